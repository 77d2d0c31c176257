//! Parsing of the weather service's `&key=value` response body and applying
//! it to the controller state.

use chrono::{DateTime, Utc};

use crate::controller::{ControllerState, WeatherUpdateFlags};

/// Size of the value buffer; values keep at most `MAX_VALUE_LEN - 1` bytes.
pub const MAX_VALUE_LEN: usize = 128;

/// Looks up `key` in a `&`-separated `key=value` list.
///
/// The list ends at the first space or newline. The first pair whose key ends
/// with `key` wins, so `xrd=1` answers for `rd`. An empty value counts as
/// absent, even if a later pair repeats the key.
pub fn find_key_val<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let end = text.find([' ', '\n']).unwrap_or(text.len());

    let (_, value) = text[..end]
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.ends_with(key))?;

    if value.is_empty() {
        None
    } else {
        Some(truncate(value, MAX_VALUE_LEN - 1))
    }
}

fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Integer prefix of `s`, 0 when there is none.
pub fn atoi(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });

    if negative {
        -value
    } else {
        value
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherResponse {
    pub sunrise: Option<i64>,
    pub sunset: Option<i64>,
    pub external_ip: Option<i64>,
    pub scale: Option<i64>,
    pub timezone: Option<i64>,
    /// Rain delay in hours. 0 cancels a running delay.
    pub rain_delay: Option<i64>,
    pub raw_data: Option<String>,
    pub err_code: Option<i64>,
}

/// What applying a response changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub flags: WeatherUpdateFlags,
    /// Persisted state differs from before and needs saving.
    pub dirty: bool,
    pub checked_at: i64,
}

impl WeatherResponse {
    /// Parses a response body. Bodies without any `&` carry no data.
    pub fn parse(body: &str) -> Option<Self> {
        let start = body.find('&')?;
        let pairs = &body[start..];
        let int = |key: &str| find_key_val(pairs, key).map(atoi);

        Some(Self {
            sunrise: int("sunrise"),
            sunset: int("sunset"),
            external_ip: int("eip"),
            scale: int("scale"),
            timezone: int("tz"),
            rain_delay: int("rd"),
            raw_data: find_key_val(pairs, "rawData").map(str::to_string),
            err_code: int("errCode"),
        })
    }

    pub fn apply(&self, state: &mut ControllerState, now: DateTime<Utc>) -> ApplyOutcome {
        let mut flags = WeatherUpdateFlags::empty();
        let mut dirty = false;

        if let Some(v) = self.sunrise.filter(|v| (0..=1440).contains(v)) {
            if v != i64::from(state.nvdata.sunrise_time) {
                state.nvdata.sunrise_time = v as u16;
                flags.insert(WeatherUpdateFlags::SUNRISE);
            }
        }

        if let Some(v) = self.sunset.filter(|v| (0..=1440).contains(v)) {
            if v != i64::from(state.nvdata.sunset_time) {
                state.nvdata.sunset_time = v as u16;
                flags.insert(WeatherUpdateFlags::SUNSET);
            }
        }

        if let Some(v) = self.external_ip {
            let ip = v as u32;
            if ip != state.nvdata.external_ip {
                state.nvdata.external_ip = ip;
                flags.insert(WeatherUpdateFlags::EIP);
            }
        }

        if let Some(v) = self.scale.filter(|v| (0..=250).contains(v)) {
            if v != i64::from(state.iopts.water_percentage) {
                state.iopts.water_percentage = v as u8;
                flags.insert(WeatherUpdateFlags::WL);
            }
        }

        if let Some(v) = self.timezone.filter(|v| (0..=108).contains(v)) {
            if v != i64::from(state.iopts.timezone) {
                state.iopts.timezone = v as u8;
                flags.insert(WeatherUpdateFlags::TZ);
            }
        }

        // Changes above already shifted now_tz if the timezone moved.
        let now_tz = state.now_tz(now);

        match self.rain_delay {
            Some(hours) if hours > 0 => {
                state.nvdata.rd_stop_time = now_tz.saturating_add(hours.saturating_mul(3600));
                state.raindelay_start();
                dirty = true;
            }
            Some(0) => {
                dirty |= state.nvdata.rd_stop_time != 0;
                state.raindelay_stop();
            }
            _ => {}
        }

        state.raw_weather_data = self.raw_data.clone().unwrap_or_default();
        state.weather_err_code = self.err_code.unwrap_or(0) as i32;
        state.checkwt_success_lasttime = Some(now_tz);
        state.weather_update_flag.insert(flags);

        ApplyOutcome {
            flags,
            dirty: dirty || !flags.is_empty(),
            checked_at: now_tz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 6, 0, 0).unwrap()
    }

    #[test]
    fn atoi_follows_c_semantics() {
        assert_eq!(atoi("42"), 42);
        assert_eq!(atoi("  -7abc"), -7);
        assert_eq!(atoi("+15"), 15);
        assert_eq!(atoi("abc"), 0);
        assert_eq!(atoi(""), 0);
    }

    #[test]
    fn find_key_val_takes_first_key_suffix() {
        let text = "&xrd=5&rd=2&scale=";
        assert_eq!(find_key_val(text, "rd"), Some("5"));
        assert_eq!(find_key_val(text, "scale"), None);
        assert_eq!(find_key_val(text, "tz"), None);
        assert_eq!(find_key_val("&rdx=5", "rd"), None);
    }

    #[test]
    fn empty_first_value_hides_later_duplicate() {
        assert_eq!(find_key_val("&scale=&scale=80", "scale"), None);

        let mut state = ControllerState::default();
        let response = WeatherResponse::parse("&scale=&scale=80").unwrap();
        assert_eq!(response.scale, None);

        response.apply(&mut state, now());
        assert_eq!(state.iopts.water_percentage, 100);
    }

    #[test]
    fn find_key_val_stops_at_whitespace() {
        let text = "&sunrise=300 &sunset=1100";
        assert_eq!(find_key_val(text, "sunrise"), Some("300"));
        assert_eq!(find_key_val(text, "sunset"), None);

        let text = "&sunrise=300\n&sunset=1100";
        assert_eq!(find_key_val(text, "sunset"), None);
    }

    #[test]
    fn long_values_are_truncated() {
        let text = format!("&rawData={}", "a".repeat(300));
        assert_eq!(find_key_val(&text, "rawData").unwrap().len(), MAX_VALUE_LEN - 1);
    }

    #[test]
    fn body_without_ampersand_is_ignored() {
        assert_eq!(WeatherResponse::parse("sunrise=300"), None);
        assert_eq!(WeatherResponse::parse(""), None);
    }

    #[test]
    fn text_before_first_ampersand_is_skipped() {
        let response = WeatherResponse::parse("scale=10&scale=90").unwrap();
        assert_eq!(response.scale, Some(90));
    }

    #[test]
    fn full_response_updates_state() {
        let body = "&scale=80&tz=32&sunrise=350&sunset=1090&eip=3232235777&rawData={\"h\":50}&errCode=0";
        let response = WeatherResponse::parse(body).unwrap();
        let mut state = ControllerState::default();

        let outcome = response.apply(&mut state, now());

        assert_eq!(state.nvdata.sunrise_time, 350);
        assert_eq!(state.nvdata.sunset_time, 1090);
        assert_eq!(state.nvdata.external_ip, 3_232_235_777);
        assert_eq!(state.iopts.water_percentage, 80);
        assert_eq!(state.iopts.timezone, 32);
        assert_eq!(state.raw_weather_data, "{\"h\":50}");
        assert_eq!(state.weather_err_code, 0);
        assert!(outcome.dirty);
        for flag in [
            WeatherUpdateFlags::SUNRISE,
            WeatherUpdateFlags::SUNSET,
            WeatherUpdateFlags::EIP,
            WeatherUpdateFlags::WL,
            WeatherUpdateFlags::TZ,
        ] {
            assert!(outcome.flags.contains(flag));
        }
        assert_eq!(outcome.checked_at, now().timestamp() - 4 * 3600);
        assert_eq!(state.checkwt_success_lasttime, Some(outcome.checked_at));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let response = WeatherResponse::parse("&sunrise=1441&sunset=-1&scale=251&tz=109").unwrap();
        let mut state = ControllerState::default();
        let before = (state.nvdata.clone(), state.iopts.clone());

        let outcome = response.apply(&mut state, now());

        assert_eq!((state.nvdata.clone(), state.iopts.clone()), before);
        assert!(outcome.flags.is_empty());
        assert!(!outcome.dirty);
    }

    #[test]
    fn unchanged_values_raise_no_flags() {
        let response = WeatherResponse::parse("&sunrise=360&scale=100").unwrap();
        let mut state = ControllerState::default();

        let outcome = response.apply(&mut state, now());

        assert!(outcome.flags.is_empty());
        assert!(!outcome.dirty);
        assert!(state.checkwt_success_lasttime.is_some());
    }

    #[test]
    fn rain_delay_starts_and_stops() {
        let mut state = ControllerState::default();

        WeatherResponse::parse("&rd=3").unwrap().apply(&mut state, now());
        assert!(state.rain_delayed);
        assert_eq!(state.nvdata.rd_stop_time, now().timestamp() + 3 * 3600);

        let outcome = WeatherResponse::parse("&rd=0").unwrap().apply(&mut state, now());
        assert!(!state.rain_delayed);
        assert_eq!(state.nvdata.rd_stop_time, 0);
        assert!(outcome.dirty);
    }

    #[test]
    fn negative_rain_delay_is_ignored() {
        let mut state = ControllerState::default();
        state.nvdata.rd_stop_time = 99;
        state.raindelay_start();

        WeatherResponse::parse("&rd=-2").unwrap().apply(&mut state, now());
        assert!(state.rain_delayed);
        assert_eq!(state.nvdata.rd_stop_time, 99);
    }

    #[test]
    fn missing_raw_data_and_err_code_reset() {
        let mut state = ControllerState::default();
        state.raw_weather_data = "old".to_string();
        state.weather_err_code = 5;

        WeatherResponse::parse("&scale=100").unwrap().apply(&mut state, now());
        assert!(state.raw_weather_data.is_empty());
        assert_eq!(state.weather_err_code, 0);

        WeatherResponse::parse("&errCode=12").unwrap().apply(&mut state, now());
        assert_eq!(state.weather_err_code, 12);
    }

    #[test]
    fn update_flags_accumulate_across_checks() {
        let mut state = ControllerState::default();

        WeatherResponse::parse("&tz=28&rd=1&eip=-1").unwrap().apply(&mut state, now());
        let first = state.weather_update_flag;
        assert!(first.contains(WeatherUpdateFlags::TZ));
        assert!(first.contains(WeatherUpdateFlags::EIP));

        let outcome = WeatherResponse::parse("&scale=50").unwrap().apply(&mut state, now());
        assert_eq!(outcome.flags, WeatherUpdateFlags::WL);
        assert_eq!(state.weather_update_flag.bits(), 0x1c);
    }

    #[test]
    fn rain_delay_uses_timezone_from_same_response() {
        let mut state = ControllerState::default();

        WeatherResponse::parse("&tz=28&rd=1").unwrap().apply(&mut state, now());

        assert_eq!(state.iopts.timezone, 28);
        assert_eq!(
            state.nvdata.rd_stop_time - now().timestamp(),
            -5 * 3600 + 3600
        );
    }

    #[test]
    fn external_ip_wraps_into_u32() {
        let mut state = ControllerState::default();

        WeatherResponse::parse("&eip=-1").unwrap().apply(&mut state, now());

        assert_eq!(state.nvdata.external_ip, u32::MAX);
    }
}
