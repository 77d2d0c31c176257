//! InfluxDB export of controller telemetry.
//!
//! Settings live in `influx.json`. The client is built lazily on the first
//! write after the settings change, so a disabled exporter never connects.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use influxdb::{Client, InfluxDbWriteable, Query, WriteQuery};
use serde::{Deserialize, Serialize};

use crate::controller::ControllerState;
use crate::error::Result;

pub const INFLUX_CONFIG_FILE: &str = "influx.json";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InfluxConfig {
    #[serde(default, with = "enabled_flag")]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub token: String,
}

impl InfluxConfig {
    pub fn new(
        enabled: bool,
        url: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            enabled,
            url: url.into(),
            org: org.into(),
            bucket: bucket.into(),
            token: token.into(),
        }
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

/// `enabled` is stored as 0/1. Anything above 1 invalidates the document.
mod enabled_flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Int(u64),
        Bool(bool),
    }

    pub fn serialize<S: Serializer>(enabled: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(u8::from(*enabled))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match Flag::deserialize(d)? {
            Flag::Bool(b) => Ok(b),
            Flag::Int(0) => Ok(false),
            Flag::Int(1) => Ok(true),
            Flag::Int(n) => Err(de::Error::custom(format!(
                "enabled must be 0 or 1, got {n}"
            ))),
        }
    }
}

/// Telemetry point written after each weather check.
#[derive(InfluxDbWriteable, Debug, Clone)]
pub struct WeatherSample {
    pub time: DateTime<Utc>,
    pub sunrise: i64,
    pub sunset: i64,
    pub water_level: i64,
    pub timezone: i64,
    pub rain_delayed: bool,
    pub err_code: i64,
    // Parameters changed by weather checks since the last sample.
    pub update_flags: i64,
    #[influxdb(tag)]
    pub location: String,
}

impl WeatherSample {
    pub const MEASUREMENT: &'static str = "weather";

    pub fn from_state(state: &ControllerState, time: DateTime<Utc>) -> Self {
        Self {
            time,
            sunrise: i64::from(state.nvdata.sunrise_time),
            sunset: i64::from(state.nvdata.sunset_time),
            water_level: i64::from(state.iopts.water_percentage),
            timezone: i64::from(state.iopts.timezone),
            rain_delayed: state.rain_delayed,
            err_code: i64::from(state.weather_err_code),
            update_flags: i64::from(state.weather_update_flag.bits()),
            location: state.sopts.location.clone(),
        }
    }

    pub fn into_write_query(self) -> WriteQuery {
        self.into_query(Self::MEASUREMENT)
    }
}

pub struct InfluxExporter {
    path: PathBuf,
    enabled: bool,
    initialized: bool,
    client: Option<Client>,
}

impl InfluxExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            enabled: false,
            initialized: false,
            client: None,
        }
    }

    pub fn set_config_fields(
        &mut self,
        enabled: bool,
        url: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<()> {
        self.set_config(&InfluxConfig::new(enabled, url, org, bucket, token))
    }

    /// Stores new settings. The next write reconnects with them.
    pub fn set_config(&mut self, config: &InfluxConfig) -> Result<()> {
        std::fs::write(&self.path, serde_json::to_string(config)?)?;

        self.client = None;
        self.enabled = config.enabled;
        self.initialized = true;
        tracing::info!(enabled = config.enabled, url = %config.url, "influx settings stored");
        Ok(())
    }

    /// Loads the settings, or the disabled defaults if they are missing or invalid.
    pub fn get_config(&mut self) -> InfluxConfig {
        let config = match InfluxConfig::read(&self.path) {
            Ok(Some(config)) => config,
            Ok(None) => InfluxConfig::default(),
            Err(e) => {
                tracing::debug!("influx settings unreadable: {}", e);
                InfluxConfig::default()
            }
        };

        self.enabled = config.enabled;
        self.initialized = true;
        config
    }

    pub fn init(&mut self) {
        self.get_config();
    }

    pub fn is_enabled(&mut self) -> bool {
        if !self.initialized {
            self.init();
        }
        self.enabled
    }

    /// Writes one point. Returns whether it was sent.
    pub async fn write_point(&mut self, query: WriteQuery) -> Result<bool> {
        if !self.is_enabled() {
            return Ok(false);
        }

        if self.client.is_none() {
            self.client = self.connect();
        }
        let Some(client) = &self.client else {
            return Ok(false);
        };

        match query.build() {
            Ok(line) => tracing::debug!("writing: {}", line.get()),
            Err(e) => tracing::debug!("point has no line protocol form: {}", e),
        }

        if let Err(e) = client.query(query).await {
            tracing::warn!("InfluxDB write failed: {}", e);
            return Err(e.into());
        }
        Ok(true)
    }

    fn connect(&self) -> Option<Client> {
        let config = match InfluxConfig::read(&self.path) {
            Ok(Some(config)) => config,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!("influx settings unreadable: {}", e);
                return None;
            }
        };
        if !config.enabled {
            return None;
        }

        tracing::info!(url = %config.url, bucket = %config.bucket, "connecting to InfluxDB");
        let client = Client::new(config.url, config.bucket);
        if config.token.is_empty() {
            Some(client)
        } else {
            Some(client.with_token(config.token))
        }
    }
}
