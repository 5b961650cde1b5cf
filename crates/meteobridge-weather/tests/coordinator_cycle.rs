//! Integration tests for the update coordinator using wiremock.
//!
//! These drive whole refresh cycles against a mock Open-Meteo server,
//! exercising location resolution, geocoding, fetching and publishing
//! through the public API only.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meteobridge_core::{EntryConfig, LocationMode, PanelConfig};
use meteobridge_weather::publish::EntitySnapshot;
use meteobridge_weather::{
    CoordinateSource, Coordinates, Coordinator, GeocodeCache, OpenMeteoClient, RetryConfig,
    StatePublisher, TrackedPosition, TrackerLookup,
};
use parking_lot::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingPublisher {
    snapshots: Mutex<Vec<EntitySnapshot>>,
    persisted: Mutex<Vec<(Coordinates, String)>>,
}

impl StatePublisher for RecordingPublisher {
    fn publish(&self, snapshot: EntitySnapshot) {
        self.snapshots.lock().push(snapshot);
    }

    fn persist_location(&self, coordinates: Coordinates, place_name: &str) {
        self.persisted
            .lock()
            .push((coordinates, place_name.to_string()));
    }
}

/// Tracker returning a fixed scripted position, or nothing.
struct FixedTracker {
    position: Option<TrackedPosition>,
}

impl TrackerLookup for FixedTracker {
    fn position(&self, _entity_id: &str) -> Option<TrackedPosition> {
        self.position.clone()
    }
}

fn base_config() -> EntryConfig {
    EntryConfig {
        mode: LocationMode::Static,
        latitude: 52.23,
        longitude: 21.01,
        tracked_entity: None,
        update_interval_min: 10,
        geocode_cooldown_min: 10,
        options_save_cooldown_secs: 60,
        min_track_interval_min: 15,
        enabled_metrics: vec![
            "temperature_2m".to_string(),
            "relative_humidity_2m".to_string(),
        ],
        place_name_override: None,
        panel: None,
    }
}

fn forecast_body() -> serde_json::Value {
    serde_json::json!({
        "utc_offset_seconds": 0,
        "current": {
            "time": "2026-08-30T12:00",
            "interval": 900,
            "temperature_2m": 19.6,
            "relative_humidity_2m": 61.0,
            "weathercode": 2,
            "is_day": 1
        },
        "hourly": {
            "time": [
                "2026-08-30T12:00", "2026-08-30T13:00", "2026-08-30T14:00",
                "2026-08-30T15:00", "2026-08-30T16:00"
            ],
            "temperature_2m": [19.6, 20.1, 20.4, 20.2, 19.8],
            "weathercode": [2, 2, 3, 3, 61],
            "direct_radiation": [520.0, 480.0, 410.0, 300.0, 150.0],
            "diffuse_radiation": [110.0, 120.0, 130.0, 120.0, 90.0],
            "sunshine_duration": [3600.0, 3600.0, 3200.0, 2800.0, 1200.0]
        },
        "daily": {
            "time": ["2026-08-30", "2026-08-31"],
            "temperature_2m_max": [22.5, 21.0],
            "temperature_2m_min": [12.1, 11.4],
            "weathercode": [3, 61]
        }
    })
}

fn reverse_geocode_body() -> serde_json::Value {
    serde_json::json!({
        "results": [{
            "name": "Warsaw",
            "admin1": "Mazovia",
            "country_code": "PL"
        }]
    })
}

async fn mount_forecast(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .mount(server)
        .await;
}

async fn mount_reverse_geocode(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reverse_geocode_body()))
        .mount(server)
        .await;
}

fn build_coordinator(
    server: &MockServer,
    config: EntryConfig,
    tracker: Arc<dyn TrackerLookup>,
    publisher: Arc<RecordingPublisher>,
) -> Coordinator {
    let client = OpenMeteoClient::new_with_base_url(&server.uri())
        .expect("client")
        .with_retry(RetryConfig::new(3, Duration::from_millis(10)));
    let geocode = GeocodeCache::new_with_base_urls(
        Duration::from_secs(600),
        "en",
        &format!("{}/v1/reverse", server.uri()),
        &format!("{}/reverse", server.uri()),
    )
    .expect("geocode");
    Coordinator::with_clients(config, tracker, publisher, client, geocode)
        .expect("coordinator")
}

#[tokio::test]
async fn full_cycle_publishes_weather_sensors_and_place_name() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    mount_reverse_geocode(&server).await;

    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = build_coordinator(
        &server,
        base_config(),
        Arc::new(FixedTracker { position: None }),
        Arc::clone(&publisher),
    );

    let outcome = coordinator.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(outcome.place_name, "Warsaw, PL");
    assert_eq!(outcome.source, CoordinateSource::Static);
    assert!(!outcome.stale);

    let snapshots = publisher.snapshots.lock();
    assert_eq!(snapshots.len(), 1);
    let snapshot = &snapshots[0];
    assert_eq!(snapshot.weather.temperature_c, Some(19.6));
    assert_eq!(snapshot.sensors.len(), 2);
    assert_eq!(snapshot.diagnostics.place_name, "Warsaw, PL");
    assert!(!snapshot.daily_forecast.is_empty());

    // coordinates were persisted on the first cycle
    let persisted = publisher.persisted.lock();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].0, Coordinates::new(52.23, 21.01));
}

#[tokio::test]
async fn tracked_entity_without_fix_falls_back_to_configured_coordinates() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    mount_reverse_geocode(&server).await;

    let mut config = base_config();
    config.mode = LocationMode::Track;
    config.tracked_entity = Some("device_tracker.phone".to_string());

    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = build_coordinator(
        &server,
        config,
        Arc::new(FixedTracker { position: None }),
        Arc::clone(&publisher),
    );

    let outcome = coordinator.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(outcome.source, CoordinateSource::Fallback);
    assert_eq!(outcome.coordinates, Coordinates::new(52.23, 21.01));

    let snapshots = publisher.snapshots.lock();
    assert_eq!(snapshots[0].diagnostics.source, CoordinateSource::Fallback);
}

#[tokio::test]
async fn tracked_entity_with_gps_fix_drives_the_query() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    mount_reverse_geocode(&server).await;

    let mut config = base_config();
    config.mode = LocationMode::Track;
    config.tracked_entity = Some("device_tracker.phone".to_string());

    let tracker = Arc::new(FixedTracker {
        position: Some(TrackedPosition {
            coordinates: Coordinates::new(50.06, 19.94),
            accuracy_m: Some(8.0),
            reported_at: Utc::now(),
            source_is_gps: true,
        }),
    });

    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = build_coordinator(&server, config, tracker, Arc::clone(&publisher));

    let outcome = coordinator.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(outcome.source, CoordinateSource::Tracker);
    assert_eq!(outcome.coordinates, Coordinates::new(50.06, 19.94));
}

#[tokio::test]
async fn outage_reserves_previous_reading_and_keeps_place_name() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    mount_reverse_geocode(&server).await;

    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = build_coordinator(
        &server,
        base_config(),
        Arc::new(FixedTracker { position: None }),
        Arc::clone(&publisher),
    );

    let t0 = Utc::now();
    let first = coordinator.run_cycle(t0).await.expect("first cycle");

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let second = coordinator
        .run_cycle(t0 + chrono::Duration::minutes(10))
        .await
        .expect("second cycle");
    assert!(second.stale);
    assert_eq!(second.observed_at, first.observed_at);
    // geocode failure degrades to the cached name
    assert_eq!(second.place_name, first.place_name);
}

#[tokio::test]
async fn panel_config_enables_the_readiness_entity() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    mount_reverse_geocode(&server).await;

    let mut config = base_config();
    config.panel = Some(PanelConfig {
        power_kwp: 5.0,
        azimuth_deg: 180.0,
        tilt_deg: 35.0,
        efficiency: 0.85,
    });

    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = build_coordinator(
        &server,
        config,
        Arc::new(FixedTracker { position: None }),
        Arc::clone(&publisher),
    );

    coordinator.run_cycle(Utc::now()).await.expect("cycle");

    let snapshots = publisher.snapshots.lock();
    let readiness = snapshots[0]
        .appliances_ready
        .as_ref()
        .expect("readiness entity present when a panel is configured");
    assert!(!readiness.reasoning.is_empty());
}

#[tokio::test]
async fn bad_request_fails_the_first_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid parameters"))
        .mount(&server)
        .await;
    mount_reverse_geocode(&server).await;

    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = build_coordinator(
        &server,
        base_config(),
        Arc::new(FixedTracker { position: None }),
        Arc::clone(&publisher),
    );

    let result = coordinator.run_cycle(Utc::now()).await;
    assert!(result.is_err());
    assert!(publisher.snapshots.lock().is_empty());
}
