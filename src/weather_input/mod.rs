pub mod http_input;
pub mod response;

use std::error::Error;

use chrono::{DateTime, Utc};

use crate::controller::ControllerState;
use crate::error::SprinklerError;
use crate::metrics_output::csv_output::{append_water_level, WaterLevelRecord};
use crate::DataDir;
use response::{ApplyOutcome, WeatherResponse};

/// A weather lookup built from the controller's options.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRequest {
    /// The configured weather host, or a full base URL.
    pub host: String,
    /// Request path without the leading `/`, spaces already escaped.
    pub path: String,
}

impl WeatherRequest {
    /// Returns `None` when no weather host is configured.
    pub fn from_state(state: &ControllerState) -> Option<Self> {
        let host = state.sopts.weather_url.trim();
        if host.is_empty() {
            return None;
        }

        let path = format!(
            "{}?loc={}&wto={}&fwv={}",
            state.iopts.use_weather,
            state.sopts.location,
            state.sopts.weather_opts,
            state.iopts.fw_version
        )
        .replace(' ', "%20");

        Some(Self {
            host: host.to_string(),
            path,
        })
    }

    pub fn url(&self) -> String {
        let base = if self.host.contains("://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.host)
        };
        format!("{}/{}", base, self.path)
    }

    /// The request as it goes over the wire.
    pub fn to_http_request(&self) -> String {
        format!("GET /{} HTTP/1.0\r\nHOST: {}\r\n\r\n", self.path, self.host)
    }
}

/// The weather source trait, yielding the response body of a lookup.
pub trait WeatherInput {
    type Error: Error + Sync + Send;

    async fn fetch(&self, request: &WeatherRequest) -> Result<String, Self::Error>;
}

/// Runs one weather lookup and applies the result.
///
/// Returns `None` when the lookup was skipped or the response had no data.
pub async fn check_weather<I: WeatherInput>(
    input: &I,
    state: &mut ControllerState,
    data_dir: &DataDir,
    now: DateTime<Utc>,
) -> crate::error::Result<Option<ApplyOutcome>>
where
    SprinklerError: From<I::Error>,
{
    let Some(request) = WeatherRequest::from_state(state) else {
        tracing::debug!("no weather host configured, skipping lookup");
        return Ok(None);
    };
    tracing::debug!("{}", request.to_http_request());

    let body = input.fetch(&request).await?;
    tracing::debug!(%body, "weather response");

    let Some(response) = WeatherResponse::parse(&body) else {
        tracing::info!("weather response carried no data");
        return Ok(None);
    };

    let outcome = response.apply(state, now);
    if !state.raw_weather_data.is_empty() {
        tracing::debug!(raw = %state.raw_weather_data, "weather raw data");
    }
    if outcome.dirty {
        state.save(data_dir.controller_state())?;
    }
    tracing::info!(
        flags = outcome.flags.bits(),
        pending_flags = state.weather_update_flag.bits(),
        water_level = state.iopts.water_percentage,
        rain_delayed = state.rain_delayed,
        err_code = state.weather_err_code,
        "weather check applied"
    );

    append_water_level(
        data_dir.water_level_log(),
        WaterLevelRecord {
            time: outcome.checked_at,
            water_percentage: state.iopts.water_percentage,
        },
    )
    .await?;

    Ok(Some(outcome))
}
