//! Reverse geocoding: convert coordinates to human-readable place names.
//! Open-Meteo geocoding first, Nominatim (OpenStreetMap) as fallback -
//! both free, no API key required.
//!
//! The cache gates network calls behind a cooldown: unchanged coordinates
//! are not re-resolved until the cooldown elapses, and failures always
//! degrade to the previous name or a "lat,lon" label. `resolve_place`
//! never fails.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{Coordinates, WeatherError};

const OPEN_METEO_REVERSE_URL: &str = "https://geocoding-api.open-meteo.com/v1/reverse";
const NOMINATIM_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "meteobridge/0.1 (https://github.com/meteobridge)";

#[derive(Debug, Deserialize)]
struct OpenMeteoReverseResponse {
    results: Option<Vec<OpenMeteoReverseResult>>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoReverseResult {
    name: Option<String>,
    admin1: Option<String>,
    admin2: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    name: Option<String>,
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedPlace {
    coordinates: Coordinates,
    name: String,
    resolved_at: DateTime<Utc>,
}

/// Per-entry reverse-geocode cache. Never shared across entries.
#[derive(Debug)]
pub struct GeocodeCache {
    client: reqwest::Client,
    primary_url: String,
    fallback_url: String,
    cooldown: Duration,
    language: String,
    cached: Option<CachedPlace>,
}

impl GeocodeCache {
    /// Cache against the public geocoding endpoints.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new(cooldown: Duration, language: &str) -> Result<Self, WeatherError> {
        Self::new_with_base_urls(cooldown, language, OPEN_METEO_REVERSE_URL, NOMINATIM_REVERSE_URL)
    }

    /// Cache against custom endpoints (tests, self-hosted mirrors).
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be constructed.
    pub fn new_with_base_urls(
        cooldown: Duration,
        language: &str,
        primary_url: &str,
        fallback_url: &str,
    ) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            primary_url: primary_url.to_string(),
            fallback_url: fallback_url.to_string(),
            cooldown,
            language: language.to_string(),
            cached: None,
        })
    }

    /// Replace the cooldown (options update).
    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    /// Name from the last successful geocode, if any.
    pub fn cached_name(&self) -> Option<&str> {
        self.cached.as_ref().map(|c| c.name.as_str())
    }

    /// Timestamp of the last successful geocode.
    pub fn last_geocode_at(&self) -> Option<DateTime<Utc>> {
        self.cached.as_ref().map(|c| c.resolved_at)
    }

    /// Resolve coordinates to a place name. Serves the cached name for
    /// near-identical coordinates within the cooldown; otherwise queries
    /// upstream. All failures degrade to the previous name or a
    /// coordinate label.
    pub async fn resolve_place(&mut self, coordinates: Coordinates, now: DateTime<Utc>) -> String {
        if let Some(cached) = &self.cached {
            let fresh = (now - cached.resolved_at)
                .to_std()
                .map(|elapsed| elapsed < self.cooldown)
                .unwrap_or(false);
            if fresh && cached.coordinates.approx_eq(&coordinates) {
                tracing::debug!("geocode cache hit for {}", coordinates);
                return cached.name.clone();
            }
        }

        match self.lookup(coordinates).await {
            Some(name) => {
                tracing::info!("reverse geocoded {} to {:?}", coordinates, name);
                self.cached = Some(CachedPlace {
                    coordinates,
                    name: name.clone(),
                    resolved_at: now,
                });
                name
            }
            None => match &self.cached {
                Some(cached) => {
                    tracing::debug!(
                        "reverse geocode failed, keeping previous name {:?}",
                        cached.name
                    );
                    cached.name.clone()
                }
                None => {
                    tracing::debug!("reverse geocode failed with no previous name");
                    coordinates.label()
                }
            },
        }
    }

    async fn lookup(&self, coordinates: Coordinates) -> Option<String> {
        if let Some(name) = self.query_open_meteo(coordinates).await {
            return Some(name);
        }
        self.query_nominatim(coordinates).await
    }

    async fn query_open_meteo(&self, coordinates: Coordinates) -> Option<String> {
        let response = match self
            .client
            .get(&self.primary_url)
            .query(&[
                ("latitude", coordinates.latitude.to_string()),
                ("longitude", coordinates.longitude.to_string()),
                ("count", "1".to_string()),
                ("language", self.language.clone()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("open-meteo reverse geocode request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                "open-meteo reverse geocode returned status {}",
                response.status()
            );
            return None;
        }

        let body: OpenMeteoReverseResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("open-meteo reverse geocode parse error: {}", e);
                return None;
            }
        };

        let result = body.results?.into_iter().next()?;
        let name = result.name.or(result.admin2).or(result.admin1)?;
        Some(match result.country_code {
            Some(cc) if !cc.is_empty() => format!("{}, {}", name, cc.to_uppercase()),
            _ => name,
        })
    }

    async fn query_nominatim(&self, coordinates: Coordinates) -> Option<String> {
        let response = match self
            .client
            .get(&self.fallback_url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", coordinates.latitude.to_string()),
                ("lon", coordinates.longitude.to_string()),
                ("zoom", "10".to_string()),
                ("accept-language", self.language.clone()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("nominatim reverse geocode request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                "nominatim reverse geocode returned status {}",
                response.status()
            );
            return None;
        }

        let body: NominatimResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("nominatim reverse geocode parse error: {}", e);
                return None;
            }
        };

        let country_code = body
            .address
            .as_ref()
            .and_then(|a| a.country_code.clone());
        let name = body.address.and_then(|a| {
            a.city
                .or(a.town)
                .or(a.village)
                .or(a.municipality)
        });
        let name = name.or(body.name)?;
        if name.is_empty() {
            return None;
        }
        Some(match country_code {
            Some(cc) if !cc.is_empty() => format!("{}, {}", name, cc.to_uppercase()),
            _ => name,
        })
    }
}
