//! Per-cycle coordinate resolution: static coordinates, tracked-entity
//! GPS positions, and fallback to last-good coordinates when tracking
//! data is stale or missing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use meteobridge_core::{EntryConfig, LocationMode};

use crate::types::{Coordinates, CoordinateSource, TrackedPosition};

/// Read-only view into the host's state store for the tracked entity.
pub trait TrackerLookup: Send + Sync {
    /// Last known position of the entity, if the host has one.
    fn position(&self, entity_id: &str) -> Option<TrackedPosition>;
}

/// One-shot notices emitted on fallback episode transitions. Each is
/// produced exactly once per episode, never repeated while the state
/// persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationNotice {
    FallbackEngaged { entity_id: String, reason: &'static str },
    TrackerRecovered { entity_id: String },
}

/// Outcome of resolving coordinates for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub coordinates: Coordinates,
    pub source: CoordinateSource,
    /// Coordinates moved beyond epsilon compared to the previous cycle.
    pub changed: bool,
    pub notice: Option<LocationNotice>,
}

/// Owns the per-entry location state. Constructed per configuration
/// entry and never shared.
#[derive(Debug)]
pub struct LocationResolver {
    mode: LocationMode,
    static_coords: Coordinates,
    tracked_entity: Option<String>,
    min_track_interval: ChronoDuration,
    active: Option<Coordinates>,
    source: CoordinateSource,
    last_read_at: Option<DateTime<Utc>>,
    fallback_warned: bool,
}

impl LocationResolver {
    pub fn new(config: &EntryConfig) -> Self {
        Self {
            mode: config.mode,
            static_coords: Coordinates::new(config.latitude, config.longitude),
            tracked_entity: config.tracked_entity.clone(),
            min_track_interval: ChronoDuration::from_std(config.min_track_interval())
                .unwrap_or_else(|_| ChronoDuration::minutes(15)),
            active: None,
            source: CoordinateSource::Static,
            last_read_at: None,
            fallback_warned: false,
        }
    }

    /// Apply an options update. Last-good coordinates survive; the
    /// fallback episode flag survives too, so a persisting condition
    /// does not warn again.
    pub fn apply_config(&mut self, config: &EntryConfig) {
        self.mode = config.mode;
        self.static_coords = Coordinates::new(config.latitude, config.longitude);
        self.tracked_entity = config.tracked_entity.clone();
        self.min_track_interval = ChronoDuration::from_std(config.min_track_interval())
            .unwrap_or(self.min_track_interval);
    }

    /// Coordinates accepted by the most recent cycle, if any.
    pub fn active_coordinates(&self) -> Option<Coordinates> {
        self.active
    }

    /// Resolve the active coordinates for this cycle.
    pub fn resolve(&mut self, now: DateTime<Utc>, tracker: &dyn TrackerLookup) -> ResolvedLocation {
        match self.mode {
            LocationMode::Static => self.resolve_static(),
            LocationMode::Track => self.resolve_tracked(now, tracker),
        }
    }

    fn resolve_static(&mut self) -> ResolvedLocation {
        let changed = self
            .active
            .map_or(true, |prev| !prev.approx_eq(&self.static_coords));
        self.active = Some(self.static_coords);
        self.source = CoordinateSource::Static;
        ResolvedLocation {
            coordinates: self.static_coords,
            source: CoordinateSource::Static,
            changed,
            notice: None,
        }
    }

    fn resolve_tracked(
        &mut self,
        now: DateTime<Utc>,
        tracker: &dyn TrackerLookup,
    ) -> ResolvedLocation {
        // Throttle: reuse the previous cycle's coordinates unconditionally
        // when the tracker was read too recently.
        if let (Some(prev), Some(read_at)) = (self.active, self.last_read_at) {
            if now - read_at < self.min_track_interval {
                return ResolvedLocation {
                    coordinates: prev,
                    source: self.source,
                    changed: false,
                    notice: None,
                };
            }
        }
        self.last_read_at = Some(now);

        let entity_id = self.tracked_entity.clone().unwrap_or_default();
        let position = if entity_id.is_empty() {
            None
        } else {
            tracker.position(&entity_id)
        };

        match position {
            Some(position) if position.source_is_gps => self.accept_fix(entity_id, position),
            Some(_) => self.fall_back(entity_id, "position is not GPS-sourced"),
            None => self.fall_back(entity_id, "entity missing or lacks coordinates"),
        }
    }

    fn accept_fix(&mut self, entity_id: String, position: TrackedPosition) -> ResolvedLocation {
        let notice = if self.fallback_warned {
            self.fallback_warned = false;
            tracing::info!("tracked entity {} recovered a GPS fix", entity_id);
            Some(LocationNotice::TrackerRecovered { entity_id })
        } else {
            None
        };

        let changed = self
            .active
            .map_or(true, |prev| !prev.approx_eq(&position.coordinates));
        self.active = Some(position.coordinates);
        self.source = CoordinateSource::Tracker;

        ResolvedLocation {
            coordinates: position.coordinates,
            source: CoordinateSource::Tracker,
            changed,
            notice,
        }
    }

    fn fall_back(&mut self, entity_id: String, reason: &'static str) -> ResolvedLocation {
        let notice = if self.fallback_warned {
            None
        } else {
            self.fallback_warned = true;
            tracing::warn!(
                "tracked entity {} unusable ({}); using last known coordinates",
                entity_id,
                reason
            );
            Some(LocationNotice::FallbackEngaged { entity_id, reason })
        };

        // Last tracker fix when there was one, configured coordinates
        // otherwise. Never empty after the first cycle.
        let coordinates = self.active.unwrap_or(self.static_coords);
        let changed = self.active.is_none();
        self.active = Some(coordinates);
        self.source = CoordinateSource::Fallback;

        ResolvedLocation {
            coordinates,
            source: CoordinateSource::Fallback,
            changed,
            notice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meteobridge_core::LocationMode;
    use parking_lot::Mutex;

    /// Scripted tracker: pops one position per `position()` call.
    struct ScriptedTracker {
        positions: Mutex<Vec<Option<TrackedPosition>>>,
    }

    impl ScriptedTracker {
        fn new(mut positions: Vec<Option<TrackedPosition>>) -> Self {
            positions.reverse();
            Self {
                positions: Mutex::new(positions),
            }
        }
    }

    impl TrackerLookup for ScriptedTracker {
        fn position(&self, _entity_id: &str) -> Option<TrackedPosition> {
            self.positions.lock().pop().flatten()
        }
    }

    fn config(mode: LocationMode) -> EntryConfig {
        EntryConfig {
            mode,
            latitude: 52.23,
            longitude: 21.01,
            tracked_entity: Some("device_tracker.phone".to_string()),
            update_interval_min: 10,
            geocode_cooldown_min: 10,
            options_save_cooldown_secs: 60,
            min_track_interval_min: 15,
            enabled_metrics: Vec::new(),
            place_name_override: None,
            panel: None,
        }
    }

    fn gps_fix(lat: f64, lon: f64, at: DateTime<Utc>) -> TrackedPosition {
        TrackedPosition {
            coordinates: Coordinates::new(lat, lon),
            accuracy_m: Some(12.0),
            reported_at: at,
            source_is_gps: true,
        }
    }

    fn non_gps_fix(at: DateTime<Utc>) -> TrackedPosition {
        TrackedPosition {
            source_is_gps: false,
            ..gps_fix(50.0, 19.0, at)
        }
    }

    #[test]
    fn static_mode_always_returns_configured_coordinates() {
        let mut resolver = LocationResolver::new(&config(LocationMode::Static));
        let tracker = ScriptedTracker::new(vec![]);
        let now = Utc::now();

        let first = resolver.resolve(now, &tracker);
        assert_eq!(first.coordinates, Coordinates::new(52.23, 21.01));
        assert_eq!(first.source, CoordinateSource::Static);
        assert!(first.changed);

        let second = resolver.resolve(now + ChronoDuration::minutes(10), &tracker);
        assert!(!second.changed);
        assert!(second.notice.is_none());
    }

    #[test]
    fn tracker_fix_is_accepted() {
        let mut resolver = LocationResolver::new(&config(LocationMode::Track));
        let now = Utc::now();
        let tracker = ScriptedTracker::new(vec![Some(gps_fix(50.06, 19.94, now))]);

        let resolved = resolver.resolve(now, &tracker);
        assert_eq!(resolved.source, CoordinateSource::Tracker);
        assert_eq!(resolved.coordinates, Coordinates::new(50.06, 19.94));
        assert!(resolved.notice.is_none());
    }

    #[test]
    fn first_cycle_without_fix_falls_back_to_configured() {
        let mut resolver = LocationResolver::new(&config(LocationMode::Track));
        let tracker = ScriptedTracker::new(vec![None]);

        let resolved = resolver.resolve(Utc::now(), &tracker);
        assert_eq!(resolved.source, CoordinateSource::Fallback);
        assert_eq!(resolved.coordinates, Coordinates::new(52.23, 21.01));
        assert!(matches!(
            resolved.notice,
            Some(LocationNotice::FallbackEngaged { .. })
        ));
    }

    #[test]
    fn loss_and_recovery_notices_fire_once_per_episode() {
        let mut resolver = LocationResolver::new(&config(LocationMode::Track));
        let t0 = Utc::now();
        let step = ChronoDuration::minutes(20);
        let tracker = ScriptedTracker::new(vec![
            Some(gps_fix(50.06, 19.94, t0)),
            None,
            Some(non_gps_fix(t0)),
            None,
            Some(gps_fix(50.07, 19.95, t0)),
            Some(gps_fix(50.07, 19.95, t0)),
        ]);

        let mut notices = Vec::new();
        for cycle in 0..6 {
            let resolved = resolver.resolve(t0 + step * cycle, &tracker);
            if let Some(notice) = resolved.notice {
                notices.push(notice);
            }
        }

        assert_eq!(notices.len(), 2, "one loss notice and one recovery notice");
        assert!(matches!(notices[0], LocationNotice::FallbackEngaged { .. }));
        assert!(matches!(notices[1], LocationNotice::TrackerRecovered { .. }));
    }

    #[test]
    fn fallback_reuses_last_tracker_fix() {
        let mut resolver = LocationResolver::new(&config(LocationMode::Track));
        let t0 = Utc::now();
        let step = ChronoDuration::minutes(20);
        let tracker = ScriptedTracker::new(vec![Some(gps_fix(50.06, 19.94, t0)), None]);

        resolver.resolve(t0, &tracker);
        let fallen_back = resolver.resolve(t0 + step, &tracker);
        assert_eq!(fallen_back.source, CoordinateSource::Fallback);
        assert_eq!(fallen_back.coordinates, Coordinates::new(50.06, 19.94));
    }

    #[test]
    fn tracker_reads_are_throttled() {
        let mut resolver = LocationResolver::new(&config(LocationMode::Track));
        let t0 = Utc::now();
        let tracker = ScriptedTracker::new(vec![
            Some(gps_fix(50.06, 19.94, t0)),
            Some(gps_fix(51.00, 20.00, t0)),
        ]);

        let first = resolver.resolve(t0, &tracker);
        assert_eq!(first.coordinates, Coordinates::new(50.06, 19.94));

        // within min_track_interval: previous coordinates, tracker not read
        let throttled = resolver.resolve(t0 + ChronoDuration::minutes(5), &tracker);
        assert_eq!(throttled.coordinates, Coordinates::new(50.06, 19.94));
        assert_eq!(throttled.source, CoordinateSource::Tracker);
        assert!(!throttled.changed);

        // after the interval the queued second fix is picked up
        let re_read = resolver.resolve(t0 + ChronoDuration::minutes(16), &tracker);
        assert_eq!(re_read.coordinates, Coordinates::new(51.00, 20.00));
        assert!(re_read.changed);
    }
}
