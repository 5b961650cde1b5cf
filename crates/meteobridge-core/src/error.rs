//! Configuration errors surfaced to the host during entry setup.
//!
//! Runtime failures (network, parsing) live with the components that
//! produce them in `meteobridge-weather`; per the propagation policy they
//! degrade to last-good values instead of reaching the host.

use thiserror::Error;

/// Errors raised while validating or applying an entry configuration.
///
/// These are surfaced once as a user-visible setup/update failure and are
/// never retried silently.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns a user-friendly message suitable for display by the host.
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => {
                "The location entry is misconfigured. Check coordinates and tracked entity."
            }
        }
    }
}
