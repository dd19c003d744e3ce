//! OpenWeatherMap client for current conditions and the 5-day forecast.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::instrument;

use crate::types::{Coordinate, CurrentConditions, Forecast, Units, WeatherError};

pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Remote weather data provider, keyed by coordinate.
#[async_trait]
pub trait WeatherApi: Send + Sync {
    async fn current(&self, coordinate: Coordinate) -> Result<CurrentConditions, WeatherError>;

    async fn forecast(&self, coordinate: Coordinate) -> Result<Forecast, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    client: Arc<Client>,
    base_url: String,
    api_key: String,
    units: Units,
    language: Option<String>,
}

impl OpenWeatherProvider {
    pub fn new(api_key: impl Into<String>, units: Units) -> Result<Self, WeatherError> {
        Self::with_base_url(OPENWEATHER_BASE_URL, api_key, units)
    }

    pub fn with_base_url(
        base_url: &str,
        api_key: impl Into<String>,
        units: Units,
    ) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            units,
            language: None,
        })
    }

    /// Ask the provider for localized condition descriptions.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn units(&self) -> Units {
        self.units
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        coordinate: Coordinate,
    ) -> Result<T, WeatherError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut query: Vec<(&str, String)> = vec![
            ("lat", coordinate.latitude.to_string()),
            ("lon", coordinate.longitude.to_string()),
            ("units", self.units.as_query().to_string()),
            ("appid", self.api_key.clone()),
        ];
        if let Some(lang) = &self.language {
            query.push(("lang", lang.clone()));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            tracing::warn!("{} returned status {}: {}", endpoint, status, message);
            return Err(WeatherError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("Malformed {} payload: {}", endpoint, e);
            WeatherError::Parse(e.to_string())
        })
    }
}

#[async_trait]
impl WeatherApi for OpenWeatherProvider {
    #[instrument(skip(self), level = "info")]
    async fn current(&self, coordinate: Coordinate) -> Result<CurrentConditions, WeatherError> {
        self.get("weather", coordinate).await
    }

    #[instrument(skip(self), level = "info")]
    async fn forecast(&self, coordinate: Coordinate) -> Result<Forecast, WeatherError> {
        self.get("forecast", coordinate).await
    }
}
