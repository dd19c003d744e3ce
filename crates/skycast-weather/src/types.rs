use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic coordinate reported by a location source or a geocoder.
///
/// `(0.0, 0.0)` is the "no fix yet" sentinel and is never a usable location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const SENTINEL: Coordinate = Coordinate {
        latitude: 0.0,
        longitude: 0.0,
    };

    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// `Some(self)` unless this is the sentinel
    pub fn usable(self) -> Option<Self> {
        (!self.is_sentinel()).then_some(self)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Lifecycle of one state slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    #[default]
    Idle,
    Loading,
    Success,
    Failed,
    /// Explicitly cleared ahead of a forced refresh
    Suspended,
}

impl FetchState {
    /// True while the presentation layer should show a progress indicator.
    pub fn is_pending(self) -> bool {
        matches!(self, FetchState::Loading | FetchState::Suspended)
    }
}

/// Units accepted by the weather provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
    Standard,
}

impl Units {
    pub fn as_query(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
            Self::Standard => "standard",
        }
    }

    pub fn temperature_suffix(self) -> &'static str {
        match self {
            Self::Metric => "°C",
            Self::Imperial => "°F",
            Self::Standard => "K",
        }
    }
}

/// One entry of the provider's `weather` array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub feels_like: Option<f64>,
    #[serde(default)]
    pub temp_min: Option<f64>,
    #[serde(default)]
    pub temp_max: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub deg: Option<f64>,
    #[serde(default)]
    pub gust: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Clouds {
    #[serde(default)]
    pub all: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunTimes {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub sunrise: Option<i64>,
    #[serde(default)]
    pub sunset: Option<i64>,
}

/// Current conditions payload.
///
/// The provider schema is an external contract; every field is optional and
/// unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub main: Option<Readings>,
    #[serde(default)]
    pub visibility: Option<i64>,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub clouds: Option<Clouds>,
    #[serde(default)]
    pub dt: Option<i64>,
    #[serde(default)]
    pub sys: Option<SunTimes>,
    #[serde(default)]
    pub timezone: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
}

impl CurrentConditions {
    pub fn primary_condition(&self) -> Option<&Condition> {
        self.weather.first()
    }
}

/// One point of the forecast time series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    #[serde(default)]
    pub dt: Option<i64>,
    #[serde(default)]
    pub main: Option<Readings>,
    #[serde(default)]
    pub weather: Vec<Condition>,
    #[serde(default)]
    pub clouds: Option<Clouds>,
    #[serde(default)]
    pub wind: Option<Wind>,
    #[serde(default)]
    pub visibility: Option<i64>,
    /// Probability of precipitation, 0.0..=1.0
    #[serde(default)]
    pub pop: Option<f64>,
    #[serde(default)]
    pub dt_txt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastCity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub timezone: Option<i32>,
}

/// Multi-point forecast payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    #[serde(default)]
    pub list: Vec<ForecastEntry>,
    #[serde(default)]
    pub city: Option<ForecastCity>,
}

/// Current conditions as committed by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub coordinate: Coordinate,
    pub fetched_at: DateTime<Utc>,
    /// Request epoch shared with the matching forecast snapshot
    pub epoch: u64,
    pub conditions: CurrentConditions,
}

/// Forecast as committed by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastSnapshot {
    pub coordinate: Coordinate,
    pub fetched_at: DateTime<Utc>,
    pub epoch: u64,
    pub forecast: Forecast,
}

/// Location service errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location service unavailable")]
    ServiceUnavailable,
    #[error("Location error: {0}")]
    Other(String),
}

impl LocationError {
    /// Only a permission problem stops the acquisition loops.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::PermissionDenied)
    }
}

/// Weather provider and geocoding errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Geocoding error: {0}")]
    Geocode(String),
}
