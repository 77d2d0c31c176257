use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};

use crate::controller::ControllerState;
use crate::error::Result;
use crate::metrics_output::csv_output::read_water_level;
use crate::metrics_output::influx_output::{InfluxExporter, WeatherSample, INFLUX_CONFIG_FILE};
use crate::weather_input::check_weather;
use crate::weather_input::http_input::HttpWeatherInput;

mod controller;
mod error;
mod logging;
mod metrics_output;
mod weather_input;

/// Where the controller keeps its files.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn controller_state(&self) -> PathBuf {
        self.root.join("controller.json")
    }

    pub fn influx_config(&self) -> PathBuf {
        self.root.join(INFLUX_CONFIG_FILE)
    }

    pub fn water_level_log(&self) -> PathBuf {
        self.root.join("waterlevel.csv")
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Weather adjustment and InfluxDB export for an irrigation controller")]
struct Cli {
    #[arg(long, env = "SPRINKLER_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Timeout for the weather lookup.
    #[arg(long, env = "WEATHER_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the weather periodically until interrupted.
    Run {
        #[arg(long, env = "WEATHER_INTERVAL_SECS", default_value_t = 3600)]
        interval_secs: u64,
    },
    /// Check the weather once.
    Weather,
    /// Show or change the InfluxDB export settings.
    Influx {
        #[command(subcommand)]
        action: InfluxAction,
    },
    /// Print the most recent water-level log entries.
    WaterLog {
        #[arg(long, default_value_t = 10)]
        last: usize,
    },
}

#[derive(Subcommand, Debug)]
enum InfluxAction {
    Show,
    Set {
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        enabled: bool,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        org: String,
        #[arg(long)]
        bucket: String,
        #[arg(long, env = "INFLUX_TOKEN", default_value = "")]
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let data_dir = DataDir::new(&cli.data_dir);

    match cli.command {
        Command::Run { interval_secs } => {
            let input = HttpWeatherInput::new(Duration::from_secs(cli.timeout_secs))?;
            run(&data_dir, &input, Duration::from_secs(interval_secs)).await
        }
        Command::Weather => {
            let input = HttpWeatherInput::new(Duration::from_secs(cli.timeout_secs))?;
            let mut state = ControllerState::load(data_dir.controller_state())?;
            let mut exporter = InfluxExporter::new(data_dir.influx_config());
            check_and_export(&data_dir, &input, &mut state, &mut exporter).await
        }
        Command::Influx { action } => influx(&data_dir, action),
        Command::WaterLog { last } => {
            let log = read_water_level(data_dir.water_level_log())?;
            for record in log.iter().skip(log.len().saturating_sub(last)) {
                println!("{}\t{}%", record.time, record.water_percentage);
            }
            Ok(())
        }
    }
}

async fn run(data_dir: &DataDir, input: &HttpWeatherInput, interval: Duration) -> Result<()> {
    let mut state = ControllerState::load(data_dir.controller_state())?;
    let mut exporter = InfluxExporter::new(data_dir.influx_config());
    let mut ticker = tokio::time::interval(interval);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(interval_secs = interval.as_secs(), "weather checks started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = check_and_export(data_dir, input, &mut state, &mut exporter).await {
                    tracing::warn!("weather check failed: {}", e);
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn check_and_export(
    data_dir: &DataDir,
    input: &HttpWeatherInput,
    state: &mut ControllerState,
    exporter: &mut InfluxExporter,
) -> Result<()> {
    let now = Utc::now();
    if check_weather(input, state, data_dir, now).await?.is_none() {
        return Ok(());
    }

    if exporter.is_enabled() {
        let sample = WeatherSample::from_state(state, now);
        match exporter.write_point(sample.into_write_query()).await {
            Ok(true) => {
                state.take_weather_update_flag();
            }
            Ok(false) => {}
            // A failed export doesn't fail the weather check.
            Err(e) => tracing::warn!("telemetry export skipped: {}", e),
        }
    }
    Ok(())
}

fn influx(data_dir: &DataDir, action: InfluxAction) -> Result<()> {
    let mut exporter = InfluxExporter::new(data_dir.influx_config());

    match action {
        InfluxAction::Show => {
            let mut config = exporter.get_config();
            if !config.token.is_empty() {
                config.token = "********".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        InfluxAction::Set {
            enabled,
            url,
            org,
            bucket,
            token,
        } => exporter.set_config_fields(enabled, url, org, bucket, token)?,
    }

    Ok(())
}
