//! Open-Meteo forecast client: one GET per cycle for current + hourly +
//! daily variables, with retry/backoff on transient failures.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::metrics::VariableSelection;
use crate::retry::RetryConfig;
use crate::types::{Coordinates, MetricMap, MetricValue, TimedValues, WeatherError, WeatherReading};

const API_BASE_URL: &str = "https://api.open-meteo.com";
const FORECAST_PATH: &str = "/v1/forecast";
const REQUEST_TIMEOUT_SECS: u64 = 20;
const USER_AGENT: &str = "meteobridge/0.1 (https://github.com/meteobridge)";

/// Raw Open-Meteo payload: parallel arrays keyed by variable name plus a
/// `time` array per block.
#[derive(Debug, Deserialize)]
struct ForecastPayload {
    #[serde(default)]
    utc_offset_seconds: i32,
    current: Option<BTreeMap<String, serde_json::Value>>,
    hourly: Option<SeriesPayload>,
    daily: Option<SeriesPayload>,
}

#[derive(Debug, Deserialize)]
struct SeriesPayload {
    #[serde(default)]
    time: Vec<String>,
    #[serde(flatten)]
    series: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl OpenMeteoClient {
    /// Client against the public Open-Meteo API.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new() -> Result<Self, WeatherError> {
        Self::new_with_base_url(API_BASE_URL)
    }

    /// Client against a custom API host (self-hosted mirror, tests).
    /// The forecast path is joined onto `base_url` per request.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new_with_base_url(base_url: &str) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy (shorter caps in tests).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch one normalized reading for the given coordinates.
    ///
    /// Transient failures (connect, timeout, 5xx) are retried up to the
    /// configured attempt count with exponential backoff; 4xx responses
    /// and malformed payloads fail immediately.
    ///
    /// # Errors
    ///
    /// [`WeatherError::BadRequest`] for 4xx responses,
    /// [`WeatherError::Malformed`] for unparseable payloads, and
    /// [`WeatherError::Exhausted`] when every retryable attempt failed.
    pub async fn fetch(
        &self,
        coordinates: Coordinates,
        variables: &VariableSelection,
        now: DateTime<Utc>,
    ) -> Result<WeatherReading, WeatherError> {
        let mut attempt = 0;
        loop {
            match self.attempt_fetch(coordinates, variables, now).await {
                Ok(reading) => {
                    if attempt > 0 {
                        tracing::info!("weather fetch succeeded after {} retries", attempt);
                    }
                    return Ok(reading);
                }
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "weather fetch attempt {} of {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        self.retry.max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    tracing::error!(
                        "weather fetch gave up after {} attempts: {}",
                        self.retry.max_attempts,
                        err
                    );
                    return Err(WeatherError::Exhausted {
                        attempts: self.retry.max_attempts,
                        last: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt_fetch(
        &self,
        coordinates: Coordinates,
        variables: &VariableSelection,
        now: DateTime<Utc>,
    ) -> Result<WeatherReading, WeatherError> {
        let url = format!("{}{}", self.base_url, FORECAST_PATH);
        let response = self
            .client
            .get(url)
            .query(&[
                ("latitude", coordinates.latitude.to_string()),
                ("longitude", coordinates.longitude.to_string()),
                ("current", variables.current.join(",")),
                ("hourly", variables.hourly.join(",")),
                ("daily", variables.daily.join(",")),
                ("temperature_unit", "celsius".to_string()),
                ("windspeed_unit", "kmh".to_string()),
                ("precipitation_unit", "mm".to_string()),
                ("timezone", "auto".to_string()),
                ("timeformat", "iso8601".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(WeatherError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = body.chars().take(100).collect();
            return Err(WeatherError::BadRequest {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ForecastPayload = response
            .json()
            .await
            .map_err(|e| WeatherError::Malformed(e.to_string()))?;

        Ok(convert_payload(payload, now))
    }
}

fn convert_payload(payload: ForecastPayload, observed_at: DateTime<Utc>) -> WeatherReading {
    let current = payload
        .current
        .map(convert_current)
        .unwrap_or_default();
    let hourly = payload
        .hourly
        .map(|series| convert_series(series, parse_hourly_time))
        .unwrap_or_default();
    let daily = payload
        .daily
        .map(|series| convert_series(series, parse_daily_time))
        .unwrap_or_default();

    WeatherReading {
        observed_at,
        utc_offset_seconds: payload.utc_offset_seconds,
        current,
        hourly,
        daily,
    }
}

fn convert_current(raw: BTreeMap<String, serde_json::Value>) -> MetricMap {
    let mut out = MetricMap::new();
    for (key, value) in raw {
        // `time` and `interval` describe the block, not a metric
        if key == "time" || key == "interval" {
            continue;
        }
        if let Some(metric) = json_to_metric(&value) {
            out.insert(key, metric);
        }
    }
    out
}

fn convert_series(
    series: SeriesPayload,
    parse_time: fn(&str) -> Option<NaiveDateTime>,
) -> Vec<TimedValues> {
    let mut out = Vec::with_capacity(series.time.len());
    for (idx, raw_time) in series.time.iter().enumerate() {
        let Some(at) = parse_time(raw_time) else {
            tracing::debug!("skipping unparseable slot timestamp {raw_time:?}");
            continue;
        };
        let mut values = MetricMap::new();
        for (key, column) in &series.series {
            if let Some(metric) = column.get(idx).and_then(json_to_metric) {
                values.insert(key.clone(), metric);
            }
        }
        out.push(TimedValues { at, values });
    }
    out
}

fn parse_hourly_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

fn parse_daily_time(raw: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn json_to_metric(value: &serde_json::Value) -> Option<MetricValue> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(MetricValue::Number),
        serde_json::Value::String(s) => Some(MetricValue::Text(s.clone())),
        _ => None,
    }
}
