//! Photovoltaic production estimate derived from the hourly radiation
//! series. Pure computation over a [`WeatherReading`]; no I/O.

use chrono::{DateTime, Timelike, Utc};
use meteobridge_core::PanelConfig;

use crate::types::{TimedValues, WeatherReading};

/// Local hours outside this window produce nothing regardless of the
/// radiation fields.
const DAYLIGHT_HOURS: std::ops::RangeInclusive<u32> = 6..=20;

/// Appliance-readiness thresholds over the 3 h forward window, in kW.
const READY_AVG_KW: f64 = 1.0;
const READY_MIN_KW: f64 = 0.6;

/// Reference tilt the incidence factor is centered on, degrees.
const REFERENCE_TILT_DEG: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PvConfidence {
    High,
    Low,
}

/// Production estimate for the current cycle. All energies in kWh,
/// powers in kW.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PvEstimate {
    pub current_kw: f64,
    pub forecast_1h_kwh: f64,
    pub forecast_3h_kwh: f64,
    pub forecast_6h_kwh: f64,
    pub forecast_today_kwh: f64,
    pub min_3h_kw: f64,
    pub avg_3h_kw: f64,
    pub ready_for_appliances: bool,
    pub confidence: PvConfidence,
    pub reasoning: String,
}

impl PvEstimate {
    fn zeroed(reasoning: impl Into<String>) -> Self {
        Self {
            current_kw: 0.0,
            forecast_1h_kwh: 0.0,
            forecast_3h_kwh: 0.0,
            forecast_6h_kwh: 0.0,
            forecast_today_kwh: 0.0,
            min_3h_kw: 0.0,
            avg_3h_kw: 0.0,
            ready_for_appliances: false,
            confidence: PvConfidence::Low,
            reasoning: reasoning.into(),
        }
    }
}

/// Whether the 3 h forward window supports running heavy appliances.
pub fn appliances_ready(avg_3h_kw: f64, min_3h_kw: f64) -> bool {
    avg_3h_kw >= READY_AVG_KW && min_3h_kw >= READY_MIN_KW
}

/// Estimate PV production from the hourly radiation series. Infallible:
/// missing data degrades to an all-zero estimate with the cause recorded
/// in `reasoning`.
pub fn compute_pv(reading: &WeatherReading, panel: &PanelConfig, now: DateTime<Utc>) -> PvEstimate {
    let Some(idx) = reading.hourly_index_at(now) else {
        return PvEstimate::zeroed("no hourly forecast data available");
    };

    let current_kw = match slot_power_kw(&reading.hourly[idx], panel) {
        Some(kw) => kw,
        None => {
            return PvEstimate::zeroed(format!(
                "radiation data missing for {}",
                reading.hourly[idx].at
            ))
        }
    };

    // The readiness window: the three hours after the current one.
    let mut window_3h = Vec::with_capacity(3);
    for slot in reading.hourly.iter().skip(idx + 1).take(3) {
        match slot_power_kw(slot, panel) {
            Some(kw) => window_3h.push(kw),
            None => {
                return PvEstimate::zeroed(format!("radiation data missing for {}", slot.at));
            }
        }
    }
    if window_3h.len() < 3 {
        return PvEstimate::zeroed("hourly forecast too short for a 3h window");
    }

    let forecast_3h_kwh: f64 = window_3h.iter().sum();
    let avg_3h_kw = forecast_3h_kwh / 3.0;
    let min_3h_kw = window_3h.iter().copied().fold(f64::INFINITY, f64::min);

    // Beyond 3 h missing data counts as zero rather than degrading the
    // whole estimate.
    let forecast_6h_kwh: f64 = reading
        .hourly
        .iter()
        .skip(idx + 1)
        .take(6)
        .map(|slot| slot_power_kw(slot, panel).unwrap_or(0.0))
        .sum();

    let today = reading.hourly[idx].at.date();
    let forecast_today_kwh: f64 = reading
        .hourly
        .iter()
        .skip(idx + 1)
        .take_while(|slot| slot.at.date() == today)
        .map(|slot| slot_power_kw(slot, panel).unwrap_or(0.0))
        .sum();

    let ready = appliances_ready(avg_3h_kw, min_3h_kw);
    let confidence = if window_3h.iter().all(|kw| *kw > 0.0) {
        PvConfidence::High
    } else {
        PvConfidence::Low
    };
    let reasoning = format!(
        "avg {:.2} kW, min {:.2} kW over next 3h (need avg >= {:.1}, min >= {:.1})",
        avg_3h_kw, min_3h_kw, READY_AVG_KW, READY_MIN_KW
    );

    PvEstimate {
        current_kw,
        forecast_1h_kwh: window_3h[0],
        forecast_3h_kwh,
        forecast_6h_kwh,
        forecast_today_kwh,
        min_3h_kw,
        avg_3h_kw,
        ready_for_appliances: ready,
        confidence,
        reasoning,
    }
}

/// Production for one hourly slot, or `None` when a radiation field is
/// absent. Night hours are zero before any field is consulted.
fn slot_power_kw(slot: &TimedValues, panel: &PanelConfig) -> Option<f64> {
    let hour = slot.at.hour();
    if !DAYLIGHT_HOURS.contains(&hour) {
        return Some(0.0);
    }
    if let Some(sunshine) = number(slot, "sunshine_duration") {
        if sunshine <= 0.0 {
            return Some(0.0);
        }
    }

    let direct = number(slot, "direct_radiation")?;
    let diffuse = number(slot, "diffuse_radiation")?;

    // Solar azimuth approximated as 15 degrees per hour around solar
    // noon, south-facing at 12:00 local.
    let sun_azimuth_deg = 180.0 + 15.0 * (f64::from(hour) - 12.0);
    let azimuth_error = (panel.azimuth_deg - sun_azimuth_deg).to_radians();
    let tilt_rad = panel.tilt_deg.to_radians();
    let incidence = azimuth_error.cos().max(0.0)
        * (panel.tilt_deg - REFERENCE_TILT_DEG).to_radians().cos().max(0.0);

    let plane_irradiance = direct * incidence + diffuse * (1.0 + tilt_rad.cos()) / 2.0;
    let kw = panel.power_kwp * panel.efficiency * plane_irradiance / 1000.0;
    Some(kw.clamp(0.0, panel.power_kwp))
}

fn number(slot: &TimedValues, key: &str) -> Option<f64> {
    slot.values.get(key).and_then(|v| v.as_number())
}
