use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// How the active coordinates are determined each refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationMode {
    /// Fixed coordinates from the configuration.
    #[default]
    Static,
    /// Follow a host entity carrying GPS attributes.
    Track,
}

/// Static parameters of the photovoltaic installation, when the PV
/// production estimate is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Rated power of the array in kWp.
    pub power_kwp: f64,
    /// Panel azimuth in degrees (180 = due south).
    pub azimuth_deg: f64,
    /// Panel tilt from horizontal in degrees.
    pub tilt_deg: f64,
    /// System efficiency factor in (0, 1].
    #[serde(default = "default_efficiency")]
    pub efficiency: f64,
}

fn default_efficiency() -> f64 {
    0.85
}

fn default_update_interval_min() -> u64 {
    10
}

fn default_geocode_cooldown_min() -> u64 {
    10
}

fn default_options_save_cooldown_secs() -> u64 {
    60
}

fn default_min_track_interval_min() -> u64 {
    15
}

/// Per-entry configuration. One entry owns exactly one coordinator;
/// entries never share state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Coordinate source mode.
    #[serde(default)]
    pub mode: LocationMode,

    /// Configured latitude in WGS84 degrees. Also the fallback position
    /// in track mode before any GPS fix was accepted.
    pub latitude: f64,

    /// Configured longitude in WGS84 degrees.
    pub longitude: f64,

    /// Host entity id to read GPS positions from (track mode only).
    #[serde(default)]
    pub tracked_entity: Option<String>,

    /// Minutes between refresh cycles.
    #[serde(default = "default_update_interval_min")]
    pub update_interval_min: u64,

    /// Minutes the reverse-geocode result is considered fresh for unchanged
    /// coordinates.
    #[serde(default = "default_geocode_cooldown_min")]
    pub geocode_cooldown_min: u64,

    /// Seconds between writes of last-good location data to host storage.
    #[serde(default = "default_options_save_cooldown_secs")]
    pub options_save_cooldown_secs: u64,

    /// Minutes between re-reads of the tracked entity in track mode.
    #[serde(default = "default_min_track_interval_min")]
    pub min_track_interval_min: u64,

    /// Metric keys to publish as individual sensors. Keys must exist in the
    /// metric catalog; unknown keys are skipped with a warning.
    #[serde(default)]
    pub enabled_metrics: Vec<String>,

    /// User-provided place name. When set, reverse geocoding is skipped
    /// entirely and this name is published as-is.
    #[serde(default)]
    pub place_name_override: Option<String>,

    /// PV installation parameters; `None` disables the production estimate.
    #[serde(default)]
    pub panel: Option<PanelConfig>,
}

impl EntryConfig {
    /// Refresh interval, floored at one minute.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_min.max(1) * 60)
    }

    /// Reverse-geocode cooldown, floored at one minute.
    pub fn geocode_cooldown(&self) -> Duration {
        Duration::from_secs(self.geocode_cooldown_min.max(1) * 60)
    }

    /// Host-storage save cooldown, floored at one minute.
    pub fn options_save_cooldown(&self) -> Duration {
        Duration::from_secs(self.options_save_cooldown_secs.max(60))
    }

    /// Tracker re-read throttle.
    pub fn min_track_interval(&self) -> Duration {
        Duration::from_secs(self.min_track_interval_min * 60)
    }

    /// Validate the entry. Errors make the entry unusable; warnings are
    /// logged by the caller but do not block setup.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !(-90.0..=90.0).contains(&self.latitude) {
            result.add_error("latitude", "must be within [-90, 90]");
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            result.add_error("longitude", "must be within [-180, 180]");
        }

        if self.mode == LocationMode::Track
            && self.tracked_entity.as_deref().map_or(true, str::is_empty)
        {
            result.add_error("tracked_entity", "track mode requires an entity id");
        }

        if self.update_interval_min == 0 {
            result.add_warning("update_interval_min", "floored to 1 minute");
        }

        if let Some(panel) = &self.panel {
            if panel.power_kwp <= 0.0 {
                result.add_error("panel.power_kwp", "must be positive");
            }
            if !(0.0..=1.0).contains(&panel.efficiency) || panel.efficiency == 0.0 {
                result.add_error("panel.efficiency", "must be within (0, 1]");
            }
            if !(0.0..=90.0).contains(&panel.tilt_deg) {
                result.add_error("panel.tilt_deg", "must be within [0, 90]");
            }
            if !(0.0..=360.0).contains(&panel.azimuth_deg) {
                result.add_error("panel.azimuth_deg", "must be within [0, 360]");
            }
        }

        result
    }

    /// Validate and convert failures into a [`ConfigError`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] summarizing every failed field.
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let result = self.validate();
        for warning in &result.warnings {
            tracing::warn!("config warning: {}", warning);
        }
        if result.is_valid() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(result.error_summary()))
        }
    }
}
