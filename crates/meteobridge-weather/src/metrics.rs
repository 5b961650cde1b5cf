//! Fixed metric catalog: every publishable metric key with its unit,
//! defined once and looked up by key. Sensor publishing never invents
//! keys at runtime.

/// Which payload block a metric is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricBlock {
    /// Current block, falling through the hourly series when absent.
    Current,
    /// Hourly series only.
    Hourly,
    /// First daily slot (today).
    Daily,
}

/// Catalog entry for one metric key.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    pub key: &'static str,
    pub unit: Option<&'static str>,
    pub block: MetricBlock,
}

const fn current(key: &'static str, unit: Option<&'static str>) -> MetricSpec {
    MetricSpec {
        key,
        unit,
        block: MetricBlock::Current,
    }
}

const fn hourly(key: &'static str, unit: Option<&'static str>) -> MetricSpec {
    MetricSpec {
        key,
        unit,
        block: MetricBlock::Hourly,
    }
}

const fn daily(key: &'static str, unit: Option<&'static str>) -> MetricSpec {
    MetricSpec {
        key,
        unit,
        block: MetricBlock::Daily,
    }
}

/// Every metric the integration can publish as a sensor.
pub const CATALOG: &[MetricSpec] = &[
    current("temperature_2m", Some("°C")),
    current("relative_humidity_2m", Some("%")),
    current("dewpoint_2m", Some("°C")),
    current("apparent_temperature", Some("°C")),
    current("pressure_msl", Some("hPa")),
    current("wind_speed_10m", Some("km/h")),
    current("wind_direction_10m", Some("°")),
    current("wind_gusts_10m", Some("km/h")),
    current("weathercode", None),
    current("cloud_cover", Some("%")),
    current("precipitation", Some("mm")),
    current("visibility", Some("m")),
    hourly("snowfall", Some("cm")),
    hourly("precipitation_probability", Some("%")),
    hourly("uv_index", None),
    hourly("sunshine_duration", Some("s")),
    hourly("direct_radiation", Some("W/m²")),
    hourly("diffuse_radiation", Some("W/m²")),
    daily("temperature_2m_max", Some("°C")),
    daily("temperature_2m_min", Some("°C")),
    daily("precipitation_sum", Some("mm")),
    daily("precipitation_probability_max", Some("%")),
    daily("wind_speed_10m_max", Some("km/h")),
    daily("wind_direction_10m_dominant", Some("°")),
    daily("sunrise", None),
    daily("sunset", None),
];

/// Look up a metric by key.
pub fn spec_for(key: &str) -> Option<&'static MetricSpec> {
    CATALOG.iter().find(|spec| spec.key == key)
}

/// Unit for a metric key, if the catalog defines one.
pub fn unit_for(key: &str) -> Option<&'static str> {
    spec_for(key).and_then(|spec| spec.unit)
}

const DEFAULT_CURRENT_VARIABLES: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dewpoint_2m",
    "pressure_msl",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "weathercode",
    "cloud_cover",
    "precipitation",
    "visibility",
    "is_day",
];

const DEFAULT_HOURLY_VARIABLES: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dewpoint_2m",
    "apparent_temperature",
    "precipitation",
    "snowfall",
    "precipitation_probability",
    "weathercode",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "pressure_msl",
    "cloud_cover",
    "visibility",
    "is_day",
    "uv_index",
];

const DEFAULT_DAILY_VARIABLES: &[&str] = &[
    "sunrise",
    "sunset",
    "temperature_2m_max",
    "temperature_2m_min",
    "weathercode",
    "precipitation_sum",
    "precipitation_probability_max",
    "wind_speed_10m_max",
    "wind_direction_10m_dominant",
];

/// Hourly variables the PV estimate needs on top of the defaults.
pub const PV_HOURLY_VARIABLES: &[&str] =
    &["direct_radiation", "diffuse_radiation", "sunshine_duration"];

/// The variable lists requested from the upstream API in one call.
#[derive(Debug, Clone)]
pub struct VariableSelection {
    pub current: Vec<String>,
    pub hourly: Vec<String>,
    pub daily: Vec<String>,
}

impl VariableSelection {
    /// Default selection covering the weather entity and catalog sensors.
    pub fn defaults() -> Self {
        Self {
            current: to_owned(DEFAULT_CURRENT_VARIABLES),
            hourly: to_owned(DEFAULT_HOURLY_VARIABLES),
            daily: to_owned(DEFAULT_DAILY_VARIABLES),
        }
    }

    /// Defaults plus the radiation variables the PV estimate reads.
    pub fn with_pv(mut self) -> Self {
        for key in PV_HOURLY_VARIABLES {
            if !self.hourly.iter().any(|have| have == key) {
                self.hourly.push((*key).to_string());
            }
        }
        self
    }
}

fn to_owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|key| (*key).to_string()).collect()
}
