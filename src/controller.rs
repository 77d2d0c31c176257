//! Persisted scheduling parameters of the controller.
//!
//! The weather lookup reads its request options from here and writes the
//! adjusted sunrise/sunset, water level, timezone and rain delay back.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Timezone option value meaning UTC. The option is `(hours + 12) * 4`.
pub const TZ_UTC: u8 = 48;

/// Non-volatile runtime data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NvData {
    /// Minutes past local midnight.
    pub sunrise_time: u16,
    /// Minutes past local midnight.
    pub sunset_time: u16,
    pub external_ip: u32,
    /// Local-time seconds at which the rain delay ends. 0 when none.
    pub rd_stop_time: i64,
}

impl Default for NvData {
    fn default() -> Self {
        Self {
            sunrise_time: 360,
            sunset_time: 1080,
            external_ip: 0,
            rd_stop_time: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IntOptions {
    /// Weather adjustment method. 0 means manual.
    pub use_weather: u8,
    /// Water level in percent, 0..=250.
    pub water_percentage: u8,
    pub timezone: u8,
    pub fw_version: u16,
}

impl Default for IntOptions {
    fn default() -> Self {
        Self {
            use_weather: 1,
            water_percentage: 100,
            timezone: TZ_UTC,
            fw_version: 220,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StringOptions {
    pub location: String,
    pub weather_opts: String,
    pub weather_url: String,
}

impl Default for StringOptions {
    fn default() -> Self {
        Self {
            location: String::new(),
            weather_opts: String::new(),
            weather_url: "weather.opensprinkler.com".to_string(),
        }
    }
}

/// Bit set of which parameters the last weather check changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeatherUpdateFlags(u8);

impl WeatherUpdateFlags {
    pub const SUNRISE: Self = Self(0x01);
    pub const SUNSET: Self = Self(0x02);
    pub const EIP: Self = Self(0x04);
    pub const WL: Self = Self(0x08);
    pub const TZ: Self = Self(0x10);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ControllerState {
    #[serde(default)]
    pub nvdata: NvData,
    #[serde(default)]
    pub iopts: IntOptions,
    #[serde(default)]
    pub sopts: StringOptions,

    #[serde(skip)]
    pub rain_delayed: bool,
    #[serde(skip)]
    pub weather_update_flag: WeatherUpdateFlags,
    #[serde(skip)]
    pub checkwt_success_lasttime: Option<i64>,
    #[serde(skip)]
    pub raw_weather_data: String,
    #[serde(skip)]
    pub weather_err_code: i32,
}

impl ControllerState {
    /// Loads the state, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("no controller state at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)?;
        let mut state: ControllerState = serde_json::from_str(&data)?;
        state.rain_delayed = state.nvdata.rd_stop_time > 0;
        Ok(state)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Current time shifted into the controller's configured timezone.
    pub fn now_tz(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp() + (i64::from(self.iopts.timezone) - i64::from(TZ_UTC)) * 900
    }

    /// Returns the flags raised since the last call and clears them.
    pub fn take_weather_update_flag(&mut self) -> WeatherUpdateFlags {
        std::mem::take(&mut self.weather_update_flag)
    }

    pub fn raindelay_start(&mut self) {
        self.rain_delayed = true;
        tracing::info!(until = self.nvdata.rd_stop_time, "rain delay started");
    }

    pub fn raindelay_stop(&mut self) {
        if self.rain_delayed {
            tracing::info!("rain delay stopped");
        }
        self.rain_delayed = false;
        self.nvdata.rd_stop_time = 0;
    }
}
