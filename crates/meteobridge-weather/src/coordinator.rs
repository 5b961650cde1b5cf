//! The per-entry update coordinator. Owns the refresh loop: resolve
//! coordinates, geocode the place name, fetch weather, derive the PV
//! estimate and publish one snapshot per cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use meteobridge_core::{ConfigError, EntryConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::geocode::GeocodeCache;
use crate::location::{LocationResolver, TrackerLookup};
use crate::metrics::VariableSelection;
use crate::provider::OpenMeteoClient;
use crate::publish::{build_snapshot, Diagnostics, StatePublisher};
use crate::pv::compute_pv;
use crate::types::{CoordinateSource, Coordinates, WeatherError, WeatherReading};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no weather data available: {0}")]
    NoData(#[from] WeatherError),
}

/// Summary of one completed cycle, returned from [`Coordinator::run_cycle`].
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub coordinates: Coordinates,
    pub source: CoordinateSource,
    pub place_name: String,
    /// The published reading was carried over from an earlier cycle.
    pub stale: bool,
    pub observed_at: DateTime<Utc>,
}

/// Everything a cycle mutates, guarded by one async mutex so cycles
/// never interleave.
struct CycleState {
    resolver: LocationResolver,
    geocode: GeocodeCache,
    client: OpenMeteoClient,
    variables: VariableSelection,
    last_reading: Option<WeatherReading>,
    last_options_save_at: Option<DateTime<Utc>>,
}

struct Shared {
    state: tokio::sync::Mutex<CycleState>,
    config: parking_lot::Mutex<EntryConfig>,
    tracker: Arc<dyn TrackerLookup>,
    publisher: Arc<dyn StatePublisher>,
    cancel: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// One coordinator per configuration entry. Cheap to clone handles via
/// the inner `Arc`; the background loop is started explicitly.
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new(
        config: EntryConfig,
        tracker: Arc<dyn TrackerLookup>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Result<Self, CoordinatorError> {
        let client = OpenMeteoClient::new()?;
        let geocode = GeocodeCache::new(config.geocode_cooldown(), "en")?;
        Self::with_clients(config, tracker, publisher, client, geocode)
    }

    /// Construct with externally built clients. The public seam for
    /// pointing the coordinator at self-hosted endpoints.
    pub fn with_clients(
        config: EntryConfig,
        tracker: Arc<dyn TrackerLookup>,
        publisher: Arc<dyn StatePublisher>,
        client: OpenMeteoClient,
        geocode: GeocodeCache,
    ) -> Result<Self, CoordinatorError> {
        config.ensure_valid()?;
        for key in &config.enabled_metrics {
            if crate::metrics::spec_for(key).is_none() {
                tracing::warn!("enabled metric {:?} is not in the catalog and will be skipped", key);
            }
        }
        let state = CycleState {
            resolver: LocationResolver::new(&config),
            geocode,
            client,
            variables: variables_for(&config),
            last_reading: None,
            last_options_save_at: None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                state: tokio::sync::Mutex::new(state),
                config: parking_lot::Mutex::new(config),
                tracker,
                publisher,
                cancel: CancellationToken::new(),
                task: parking_lot::Mutex::new(None),
            }),
        })
    }

    /// Spawn the background refresh loop. Idempotent only in the sense
    /// that callers are expected to start once; a second call replaces
    /// the task handle without stopping the first loop.
    pub fn start(&self) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    result = Self::cycle(&shared, Utc::now()) => {
                        if let Err(err) = result {
                            tracing::error!("refresh cycle failed: {}", err);
                        }
                    }
                }
                let interval = shared.config.lock().update_interval();
                tokio::select! {
                    _ = shared.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!("refresh loop stopped");
        });
        *self.shared.task.lock() = Some(handle);
    }

    /// Cancel the loop and wait for the in-flight cycle to finish.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();
        let handle = self.shared.task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!("refresh task ended abnormally: {}", err);
            }
        }
    }

    /// Run one cycle immediately, outside the loop cadence.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CoordinatorError> {
        Self::cycle(&self.shared, now).await
    }

    /// Apply an options update. Takes effect from the next cycle;
    /// location episode state and the last-good reading survive.
    pub async fn on_config_changed(&self, config: EntryConfig) -> Result<(), CoordinatorError> {
        config.ensure_valid()?;
        let mut state = self.shared.state.lock().await;
        state.resolver.apply_config(&config);
        state.geocode.set_cooldown(config.geocode_cooldown());
        state.variables = variables_for(&config);
        drop(state);
        *self.shared.config.lock() = config;
        Ok(())
    }

    async fn cycle(shared: &Shared, now: DateTime<Utc>) -> Result<CycleOutcome, CoordinatorError> {
        let config = shared.config.lock().clone();
        let mut guard = shared.state.lock().await;
        let state = &mut *guard;

        let resolved = state.resolver.resolve(now, shared.tracker.as_ref());

        let place_name = match &config.place_name_override {
            Some(name) => name.clone(),
            None => state.geocode.resolve_place(resolved.coordinates, now).await,
        };

        let (reading, stale) = match state
            .client
            .fetch(resolved.coordinates, &state.variables, now)
            .await
        {
            Ok(reading) => {
                state.last_reading = Some(reading.clone());
                (reading, false)
            }
            Err(err) => match &state.last_reading {
                Some(previous) => {
                    tracing::warn!("weather fetch failed, re-serving previous reading: {}", err);
                    (previous.clone(), true)
                }
                None => return Err(CoordinatorError::NoData(err)),
            },
        };

        let pv = config
            .panel
            .as_ref()
            .map(|panel| compute_pv(&reading, panel, now));
        let diagnostics = Diagnostics::new(
            resolved.coordinates,
            resolved.source,
            place_name.clone(),
            stale,
        );
        shared.publisher.publish(build_snapshot(
            &reading,
            &config.enabled_metrics,
            pv.as_ref(),
            diagnostics,
            now,
        ));

        // Persisting coordinates back to host storage is rate-limited,
        // except when the coordinates actually moved this cycle.
        let save_due = state.last_options_save_at.map_or(true, |at| {
            (now - at)
                .to_std()
                .map(|elapsed| elapsed >= config.options_save_cooldown())
                .unwrap_or(true)
        });
        if resolved.changed || save_due {
            shared
                .publisher
                .persist_location(resolved.coordinates, &place_name);
            state.last_options_save_at = Some(now);
        }

        Ok(CycleOutcome {
            coordinates: resolved.coordinates,
            source: resolved.source,
            place_name,
            stale,
            observed_at: reading.observed_at,
        })
    }
}

fn variables_for(config: &EntryConfig) -> VariableSelection {
    let selection = VariableSelection::defaults();
    if config.panel.is_some() {
        selection.with_pv()
    } else {
        selection
    }
}
