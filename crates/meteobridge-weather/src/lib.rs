//! Weather update coordination for Meteobridge
//!
//! Polls the Open-Meteo API on a per-entry schedule, resolves the active
//! coordinates (static or tracked), reverse-geocodes a place name and
//! publishes one entity snapshot per cycle through a host seam.

pub mod coordinator;
pub mod geocode;
pub mod location;
pub mod metrics;
pub mod provider;
pub mod publish;
pub mod pv;
pub mod retry;
pub mod types;

pub use types::*;
pub use coordinator::{Coordinator, CoordinatorError, CycleOutcome};
pub use geocode::GeocodeCache;
pub use location::{LocationNotice, LocationResolver, ResolvedLocation, TrackerLookup};
pub use provider::OpenMeteoClient;
pub use publish::{EntitySnapshot, StatePublisher};
pub use pv::{compute_pv, PvConfidence, PvEstimate};
pub use retry::RetryConfig;
