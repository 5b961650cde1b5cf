//! Snapshot assembly and the host publishing seam. Each cycle produces
//! one [`EntitySnapshot`] from the active reading; the host delivers it
//! through a [`StatePublisher`] implementation.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::metrics::{self, MetricBlock};
use crate::pv::{PvConfidence, PvEstimate};
use crate::types::{
    CoordinateSource, Coordinates, MetricMap, MetricValue, WeatherCondition, WeatherReading,
};

/// Upper bound on published hourly forecast slots (3 days).
const MAX_HOURLY_SLOTS: usize = 72;

/// Host-facing seam. The coordinator publishes snapshots and persists
/// last-good coordinates through this trait; implementations must not
/// block.
pub trait StatePublisher: Send + Sync {
    fn publish(&self, snapshot: EntitySnapshot);
    /// Write last-good coordinates and place name back to host storage.
    fn persist_location(&self, coordinates: Coordinates, place_name: &str);
}

/// Everything published for one entry in one cycle.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EntitySnapshot {
    pub weather: WeatherState,
    pub hourly_forecast: Vec<ForecastSlot>,
    pub daily_forecast: Vec<ForecastSlot>,
    pub sensors: Vec<SensorValue>,
    pub appliances_ready: Option<ApplianceReadiness>,
    pub diagnostics: Diagnostics,
}

/// Current-conditions state of the weather entity.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct WeatherState {
    pub condition: WeatherCondition,
    pub temperature_c: Option<f64>,
    pub apparent_temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_bearing_deg: Option<f64>,
    pub dew_point_c: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub visibility_km: Option<f64>,
}

/// One forecast slot, hourly or daily.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ForecastSlot {
    pub at: NaiveDateTime,
    pub condition: WeatherCondition,
    pub values: MetricMap,
}

/// One enabled metric resolved against the catalog.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SensorValue {
    pub key: &'static str,
    pub value: MetricValue,
    pub unit: Option<&'static str>,
}

/// Binary appliance-readiness state with its PV attributes.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ApplianceReadiness {
    pub is_on: bool,
    pub avg_production_w: f64,
    pub min_production_w: f64,
    pub total_3h_kwh: f64,
    pub confidence: PvConfidence,
    pub reasoning: String,
}

impl From<&PvEstimate> for ApplianceReadiness {
    fn from(estimate: &PvEstimate) -> Self {
        Self {
            is_on: estimate.ready_for_appliances,
            avg_production_w: estimate.avg_3h_kw * 1000.0,
            min_production_w: estimate.min_3h_kw * 1000.0,
            total_3h_kwh: estimate.forecast_3h_kwh,
            confidence: estimate.confidence,
            reasoning: estimate.reasoning.clone(),
        }
    }
}

/// Diagnostic attributes attached to every snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Diagnostics {
    pub data_source: &'static str,
    pub coordinates_used: Coordinates,
    pub source: CoordinateSource,
    pub place_name: String,
    /// True when the reading was carried over from a previous cycle
    /// because the fetch failed.
    pub stale: bool,
}

impl Diagnostics {
    pub fn new(
        coordinates_used: Coordinates,
        source: CoordinateSource,
        place_name: String,
        stale: bool,
    ) -> Self {
        Self {
            data_source: "open-meteo",
            coordinates_used,
            source,
            place_name,
            stale,
        }
    }
}

/// Assemble the snapshot for one cycle.
pub fn build_snapshot(
    reading: &WeatherReading,
    enabled_metrics: &[String],
    pv: Option<&PvEstimate>,
    diagnostics: Diagnostics,
    now: DateTime<Utc>,
) -> EntitySnapshot {
    EntitySnapshot {
        weather: build_weather_state(reading, now),
        hourly_forecast: hourly_forecast(reading, now),
        daily_forecast: daily_forecast(reading),
        sensors: resolve_sensors(reading, enabled_metrics, now),
        appliances_ready: pv.map(ApplianceReadiness::from),
        diagnostics,
    }
}

fn build_weather_state(reading: &WeatherReading, now: DateTime<Utc>) -> WeatherState {
    let is_day = reading
        .current_or_hourly("is_day", now)
        .map_or(true, |v| v != 0.0);
    let condition = reading
        .current_or_hourly("weathercode", now)
        .map_or(WeatherCondition::default(), |code| {
            WeatherCondition::from_wmo_code(code as i64, is_day)
        });

    WeatherState {
        condition,
        temperature_c: reading.current_or_hourly("temperature_2m", now),
        apparent_temperature_c: reading.current_or_hourly("apparent_temperature", now),
        humidity_pct: reading.current_or_hourly("relative_humidity_2m", now),
        pressure_hpa: reading.current_or_hourly("pressure_msl", now),
        wind_speed_kmh: reading.current_or_hourly("wind_speed_10m", now),
        wind_bearing_deg: reading.current_or_hourly("wind_direction_10m", now),
        dew_point_c: reading.current_or_hourly("dewpoint_2m", now),
        cloud_cover_pct: reading.current_or_hourly("cloud_cover", now),
        // upstream reports meters
        visibility_km: reading.current_or_hourly("visibility", now).map(|m| m / 1000.0),
    }
}

/// Hourly slots starting at the current hour, capped at three days.
fn hourly_forecast(reading: &WeatherReading, now: DateTime<Utc>) -> Vec<ForecastSlot> {
    let start = reading.hourly_index_at(now).unwrap_or(0);
    reading
        .hourly
        .iter()
        .skip(start)
        .take(MAX_HOURLY_SLOTS)
        .map(|slot| {
            let is_day = slot
                .values
                .get("is_day")
                .and_then(MetricValue::as_number)
                .map_or(true, |v| v != 0.0);
            ForecastSlot {
                at: slot.at,
                condition: slot_condition(&slot.values, is_day),
                values: slot.values.clone(),
            }
        })
        .collect()
}

fn daily_forecast(reading: &WeatherReading) -> Vec<ForecastSlot> {
    reading
        .daily
        .iter()
        .map(|slot| ForecastSlot {
            at: slot.at,
            condition: slot_condition(&slot.values, true),
            values: slot.values.clone(),
        })
        .collect()
}

fn slot_condition(values: &MetricMap, is_day: bool) -> WeatherCondition {
    values
        .get("weathercode")
        .and_then(MetricValue::as_number)
        .map_or(WeatherCondition::default(), |code| {
            WeatherCondition::from_wmo_code(code as i64, is_day)
        })
}

/// Resolve each enabled metric key against the catalog. Keys the catalog
/// does not know, or that the reading has no value for, are skipped.
fn resolve_sensors(
    reading: &WeatherReading,
    enabled_metrics: &[String],
    now: DateTime<Utc>,
) -> Vec<SensorValue> {
    let mut sensors = Vec::with_capacity(enabled_metrics.len());
    for key in enabled_metrics {
        let Some(spec) = metrics::spec_for(key) else {
            tracing::debug!("skipping unknown metric key {}", key);
            continue;
        };
        let value = match spec.block {
            MetricBlock::Current => reading
                .current_or_hourly(spec.key, now)
                .map(MetricValue::Number),
            MetricBlock::Hourly => reading
                .hourly_number_at(spec.key, now)
                .map(MetricValue::Number),
            MetricBlock::Daily => reading.daily_value(spec.key).cloned(),
        };
        if let Some(value) = value {
            sensors.push(SensorValue {
                key: spec.key,
                value,
                unit: spec.unit,
            });
        }
    }
    sensors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimedValues;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 30)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .unwrap()
    }

    fn hourly_slot(hour: u32, temp: f64) -> TimedValues {
        let mut values = MetricMap::new();
        values.insert("temperature_2m".into(), MetricValue::Number(temp));
        values.insert("weathercode".into(), MetricValue::Number(3.0));
        TimedValues { at: at(hour), values }
    }

    fn sample_reading() -> WeatherReading {
        let mut current = MetricMap::new();
        current.insert("temperature_2m".into(), MetricValue::Number(21.4));
        current.insert("relative_humidity_2m".into(), MetricValue::Number(55.0));
        current.insert("weathercode".into(), MetricValue::Number(0.0));
        current.insert("is_day".into(), MetricValue::Number(1.0));
        current.insert("visibility".into(), MetricValue::Number(24_140.0));

        let mut daily_values = MetricMap::new();
        daily_values.insert("weathercode".into(), MetricValue::Number(61.0));
        daily_values.insert(
            "sunrise".into(),
            MetricValue::Text("2026-08-30T06:12".into()),
        );

        WeatherReading {
            observed_at: Utc::now(),
            utc_offset_seconds: 0,
            current,
            hourly: (8..=20).map(|h| hourly_slot(h, 15.0 + f64::from(h))).collect(),
            daily: vec![TimedValues {
                at: at(0),
                values: daily_values,
            }],
        }
    }

    fn diagnostics() -> Diagnostics {
        Diagnostics::new(
            Coordinates::new(52.23, 21.01),
            CoordinateSource::Static,
            "Warsaw, PL".to_string(),
            false,
        )
    }

    fn noon() -> DateTime<Utc> {
        at(12).and_utc()
    }

    #[test]
    fn weather_state_reads_current_block() {
        let snapshot = build_snapshot(&sample_reading(), &[], None, diagnostics(), noon());
        assert_eq!(snapshot.weather.condition, WeatherCondition::Clear);
        assert_eq!(snapshot.weather.temperature_c, Some(21.4));
        assert_eq!(snapshot.weather.humidity_pct, Some(55.0));
        assert_eq!(snapshot.weather.visibility_km, Some(24.14));
    }

    #[test]
    fn clear_code_at_night_maps_to_clear_night() {
        let mut reading = sample_reading();
        reading
            .current
            .insert("is_day".into(), MetricValue::Number(0.0));
        let snapshot = build_snapshot(&reading, &[], None, diagnostics(), noon());
        assert_eq!(snapshot.weather.condition, WeatherCondition::ClearNight);
    }

    #[test]
    fn hourly_forecast_starts_at_current_hour() {
        let snapshot = build_snapshot(&sample_reading(), &[], None, diagnostics(), noon());
        assert_eq!(snapshot.hourly_forecast[0].at, at(12));
        assert_eq!(snapshot.hourly_forecast.len(), 9); // 12..=20
        assert_eq!(
            snapshot.hourly_forecast[0].condition,
            WeatherCondition::Cloudy
        );
    }

    #[test]
    fn sensors_resolve_against_catalog_and_skip_unknown_keys() {
        let enabled = vec![
            "temperature_2m".to_string(),
            "sunrise".to_string(),
            "definitely_not_a_metric".to_string(),
        ];
        let snapshot = build_snapshot(&sample_reading(), &enabled, None, diagnostics(), noon());

        assert_eq!(snapshot.sensors.len(), 2);
        assert_eq!(snapshot.sensors[0].key, "temperature_2m");
        assert_eq!(snapshot.sensors[0].unit, Some("°C"));
        assert_eq!(
            snapshot.sensors[1].value,
            MetricValue::Text("2026-08-30T06:12".into())
        );
    }

    #[test]
    fn pv_estimate_becomes_readiness_attributes() {
        let estimate = PvEstimate {
            current_kw: 2.0,
            forecast_1h_kwh: 1.8,
            forecast_3h_kwh: 4.5,
            forecast_6h_kwh: 7.0,
            forecast_today_kwh: 11.0,
            min_3h_kw: 1.1,
            avg_3h_kw: 1.5,
            ready_for_appliances: true,
            confidence: PvConfidence::High,
            reasoning: "sunny".to_string(),
        };
        let snapshot = build_snapshot(
            &sample_reading(),
            &[],
            Some(&estimate),
            diagnostics(),
            noon(),
        );

        let readiness = snapshot.appliances_ready.expect("readiness present");
        assert!(readiness.is_on);
        assert_eq!(readiness.avg_production_w, 1500.0);
        assert_eq!(readiness.min_production_w, 1100.0);
        assert_eq!(readiness.total_3h_kwh, 4.5);
    }
}
