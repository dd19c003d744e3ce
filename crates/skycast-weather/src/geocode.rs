//! Forward and reverse geocoding.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::types::{Coordinate, WeatherError};

pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = "SkyCast/0.1.0";

/// Name <-> coordinate lookups.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text place name. `Ok(None)` when nothing matches.
    async fn forward(&self, name: &str) -> Result<Option<Coordinate>, WeatherError>;

    /// Human-readable name for a coordinate. `Ok(None)` when nothing matches.
    async fn reverse(&self, coordinate: Coordinate) -> Result<Option<String>, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    state_district: Option<String>,
    state: Option<String>,
    county: Option<String>,
    country: Option<String>,
}

impl Address {
    /// "Place, Region" with the region omitted when it repeats the place.
    fn display_name(self) -> Option<String> {
        let state = self.state.clone();
        let country = self.country.clone();

        let place = self
            .city
            .or(self.town)
            .or(self.village)
            .or(self.municipality)
            .or(self.state_district)
            .or(self.county)
            .or(self.state)
            .or(self.country)?;

        let suffix = [state, country]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty() && *s != place);

        Some(match suffix {
            Some(s) => format!("{}, {}", place, s),
            None => place,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
    language: String,
}

impl NominatimGeocoder {
    pub fn new(language: &str) -> Result<Self, WeatherError> {
        Self::with_base_url(NOMINATIM_URL, language)
    }

    pub fn with_base_url(base_url: &str, language: &str) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, WeatherError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("Accept-Language", &self.language)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WeatherError::Geocode(format!(
                "{} returned status {}",
                path,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| WeatherError::Geocode(format!("{} parse error: {}", path, e)))
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[instrument(skip(self), level = "info")]
    async fn forward(&self, name: &str) -> Result<Option<Coordinate>, WeatherError> {
        let results: Vec<SearchResult> = self
            .get_json(
                "search",
                &[
                    ("q", name.to_string()),
                    ("format", "json".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        let Some(first) = results.into_iter().next() else {
            tracing::warn!("No coordinates found for location: {}", name);
            return Ok(None);
        };

        let latitude = first
            .lat
            .parse::<f64>()
            .map_err(|e| WeatherError::Geocode(format!("invalid latitude {:?}: {}", first.lat, e)))?;
        let longitude = first
            .lon
            .parse::<f64>()
            .map_err(|e| WeatherError::Geocode(format!("invalid longitude {:?}: {}", first.lon, e)))?;

        let coordinate = Coordinate::new(latitude, longitude);
        tracing::debug!("Geocoded {} to {}", name, coordinate);
        Ok(Some(coordinate))
    }

    #[instrument(skip(self), level = "info")]
    async fn reverse(&self, coordinate: Coordinate) -> Result<Option<String>, WeatherError> {
        let body: ReverseResponse = self
            .get_json(
                "reverse",
                &[
                    ("lat", coordinate.latitude.to_string()),
                    ("lon", coordinate.longitude.to_string()),
                    ("format", "json".to_string()),
                    ("addressdetails", "1".to_string()),
                    ("zoom", "10".to_string()),
                ],
            )
            .await?;

        let name = body.address.and_then(Address::display_name);
        if let Some(n) = &name {
            tracing::info!("Reverse geocoded to: {}", n);
        }
        Ok(name)
    }
}

/// Best-effort display name: reverse lookup, else the raw coordinate.
pub async fn display_name(geocoder: &dyn Geocoder, coordinate: Coordinate) -> String {
    match geocoder.reverse(coordinate).await {
        Ok(Some(name)) => name,
        Ok(None) => coordinate.to_string(),
        Err(e) => {
            tracing::debug!("Reverse geocode failed: {}", e);
            coordinate.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> Address {
        Address {
            city: None,
            town: None,
            village: None,
            municipality: None,
            state_district: None,
            state: None,
            county: None,
            country: None,
        }
    }

    #[test]
    fn test_city_with_state_suffix() {
        let addr = Address {
            city: Some("Seattle".into()),
            state: Some("Washington".into()),
            country: Some("United States".into()),
            ..address()
        };
        assert_eq!(addr.display_name().as_deref(), Some("Seattle, Washington"));
    }

    #[test]
    fn test_country_suffix_when_state_missing() {
        let addr = Address {
            town: Some("Hallstatt".into()),
            country: Some("Austria".into()),
            ..address()
        };
        assert_eq!(addr.display_name().as_deref(), Some("Hallstatt, Austria"));
    }

    #[test]
    fn test_state_equal_to_place_falls_back_to_country() {
        let addr = Address {
            city: Some("Berlin".into()),
            state: Some("Berlin".into()),
            country: Some("Germany".into()),
            ..address()
        };
        assert_eq!(addr.display_name().as_deref(), Some("Berlin, Germany"));
    }

    #[test]
    fn test_country_only() {
        let addr = Address {
            country: Some("Iceland".into()),
            ..address()
        };
        assert_eq!(addr.display_name().as_deref(), Some("Iceland"));
    }

    #[test]
    fn test_empty_address() {
        assert_eq!(address().display_name(), None);
    }

    #[tokio::test]
    #[ignore] // Run with: cargo test -p skycast-weather -- --ignored
    async fn test_forward_geocode_london() {
        let geocoder = NominatimGeocoder::new("en").unwrap();
        let coordinate = geocoder.forward("London").await.unwrap().unwrap();
        assert!((coordinate.latitude - 51.5).abs() < 0.5);
    }
}
