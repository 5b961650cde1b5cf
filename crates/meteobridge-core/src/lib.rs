//! Core configuration and error types for meteobridge.
//!
//! Hosts embed one [`config::EntryConfig`] per configured location entry;
//! everything else (coordinator, fetchers, derived metrics) lives in
//! `meteobridge-weather` and is constructed from it.

pub mod config;
pub mod error;

pub use config::{EntryConfig, LocationMode, PanelConfig, ValidationResult};
pub use error::ConfigError;

use anyhow::Result;

/// Initialize tracing for the embedding process.
///
/// Hosts that bring their own subscriber should skip this and install
/// theirs before constructing any coordinator.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("meteobridge core initialized");
    Ok(())
}
