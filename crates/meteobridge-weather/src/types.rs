use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Coordinate pairs closer than this are treated as the same place.
pub const COORD_EPS: f64 = 1e-4;

/// WGS84 coordinates. Immutable value type; a new instance replaces the
/// old one each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components differ by no more than [`COORD_EPS`].
    pub fn approx_eq(&self, other: &Self) -> bool {
        (self.latitude - other.latitude).abs() <= COORD_EPS
            && (self.longitude - other.longitude).abs() <= COORD_EPS
    }

    /// Short "lat,lon" label used when no place name is available.
    pub fn label(&self) -> String {
        format!("{:.2},{:.2}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// A position reported by the tracked host entity. The coordinator only
/// reads these; positions without a GPS source trigger fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPosition {
    pub coordinates: Coordinates,
    pub accuracy_m: Option<f64>,
    pub reported_at: DateTime<Utc>,
    pub source_is_gps: bool,
}

/// Where the active coordinates of a cycle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSource {
    Tracker,
    Static,
    Fallback,
}

impl CoordinateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tracker => "tracker",
            Self::Static => "static",
            Self::Fallback => "fallback",
        }
    }
}

/// Weather condition categories mapped from WMO codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    #[default]
    Clear,
    ClearNight,
    PartlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    HeavyRain,
    Snow,
    Sleet,
    Thunderstorm,
}

impl WeatherCondition {
    /// Convert a WMO weather code to a condition. Clear codes at night map
    /// to [`WeatherCondition::ClearNight`].
    /// See: https://open-meteo.com/en/docs#weathervariables
    pub fn from_wmo_code(code: i64, is_day: bool) -> Self {
        match code {
            0 | 1 if !is_day => Self::ClearNight,
            0 => Self::Clear,
            1..=2 => Self::PartlyCloudy,
            3 => Self::Cloudy,
            45 | 48 => Self::Fog,
            51 | 53 | 55 => Self::Drizzle,
            56 | 57 => Self::Sleet, // Freezing drizzle
            61 | 63 | 80 => Self::Rain,
            65 | 81 | 82 => Self::HeavyRain,
            66 | 67 => Self::Sleet, // Freezing rain
            71 | 73 | 75 | 77 | 85 | 86 => Self::Snow,
            95 | 96 | 99 => Self::Thunderstorm,
            _ => Self::Clear, // Unknown codes default to clear
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::ClearNight => "Clear Night",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::HeavyRain => "Heavy Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
        }
    }

    /// Icon identifier for host UIs.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Clear => "mdi:weather-sunny",
            Self::ClearNight => "mdi:weather-night",
            Self::PartlyCloudy => "mdi:weather-partly-cloudy",
            Self::Cloudy => "mdi:weather-cloudy",
            Self::Fog => "mdi:weather-fog",
            Self::Drizzle | Self::Rain => "mdi:weather-rainy",
            Self::HeavyRain => "mdi:weather-pouring",
            Self::Snow => "mdi:weather-snowy",
            Self::Sleet => "mdi:weather-snowy-rainy",
            Self::Thunderstorm => "mdi:weather-lightning-rainy",
        }
    }
}

/// A single metric value. Metrics are numeric except for timestamp-like
/// daily fields (sunrise, sunset) which stay textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Number(_) => None,
            Self::Text(t) => Some(t),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Metric key to value mapping for one block or time slot.
pub type MetricMap = BTreeMap<String, MetricValue>;

/// One hourly or daily slot: a local timestamp plus its metric values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedValues {
    /// Local time of the slot (daily slots use local midnight).
    pub at: NaiveDateTime,
    pub values: MetricMap,
}

/// Normalized upstream payload. Replaced wholesale on every successful
/// fetch; on failure the previous reading is re-served with its original
/// `observed_at`, so consumers can detect staleness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReading {
    /// Wall-clock time of the successful fetch this reading came from.
    pub observed_at: DateTime<Utc>,
    /// Offset of the location's local timezone, as reported upstream.
    pub utc_offset_seconds: i32,
    pub current: MetricMap,
    pub hourly: Vec<TimedValues>,
    pub daily: Vec<TimedValues>,
}

impl WeatherReading {
    /// `now` in the reading's local timezone.
    pub fn local_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.naive_utc() + ChronoDuration::seconds(i64::from(self.utc_offset_seconds))
    }

    /// Index into `hourly` matching the current hour: exact match when
    /// present, otherwise the nearest slot.
    pub fn hourly_index_at(&self, now: DateTime<Utc>) -> Option<usize> {
        if self.hourly.is_empty() {
            return None;
        }
        let local = self.local_now(now);
        let aligned = local
            .date()
            .and_hms_opt(local.hour(), 0, 0)
            .unwrap_or(local);

        let mut best: Option<(usize, i64)> = None;
        for (idx, slot) in self.hourly.iter().enumerate() {
            if slot.at == aligned {
                return Some(idx);
            }
            let diff = (slot.at - aligned).num_seconds().abs();
            if best.map_or(true, |(_, d)| diff < d) {
                best = Some((idx, diff));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Numeric value of an hourly metric at the slot nearest to `now`.
    pub fn hourly_number_at(&self, key: &str, now: DateTime<Utc>) -> Option<f64> {
        let idx = self.hourly_index_at(now)?;
        self.hourly
            .get(idx)
            .and_then(|slot| slot.values.get(key))
            .and_then(MetricValue::as_number)
    }

    /// Numeric value of a metric in the current block.
    pub fn current_number(&self, key: &str) -> Option<f64> {
        self.current.get(key).and_then(MetricValue::as_number)
    }

    /// Numeric metric from the current block, falling back through the
    /// hourly series for metrics the immediate payload omits (apparent
    /// temperature, cloud cover, dew point, ...).
    pub fn current_or_hourly(&self, key: &str, now: DateTime<Utc>) -> Option<f64> {
        self.current_number(key)
            .or_else(|| self.hourly_number_at(key, now))
    }

    /// Value of a daily metric for today (the first daily slot).
    pub fn daily_value(&self, key: &str) -> Option<&MetricValue> {
        self.daily.first().and_then(|slot| slot.values.get(key))
    }
}

/// Weather fetcher errors. Network and server failures are retryable;
/// everything else fails the attempt immediately.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API rejected request (status {status}): {body}")]
    BadRequest { status: u16, body: String },
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("all {attempts} fetch attempts failed, last error: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl WeatherError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => crate::retry::classify_error(e) == crate::retry::RetryDecision::Retry,
            Self::Server { .. } => true,
            Self::BadRequest { .. } | Self::Malformed(_) | Self::Exhausted { .. } => false,
        }
    }
}
