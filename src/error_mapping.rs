//! Maps weather crate errors onto the application error hierarchy.

use skycast_core::error::ReqwestErrorExt;
use skycast_core::{AppError, ConfigError, LocationError, NetworkError, WeatherError};

/// Conversion into [`AppError`] for errors raised by `skycast-weather`.
pub trait IntoAppError {
    fn into_app_error(self) -> AppError;
}

impl IntoAppError for skycast_weather::WeatherError {
    fn into_app_error(self) -> AppError {
        use skycast_weather::WeatherError as Source;

        match self {
            Source::Network(e) => AppError::Network(e.into_network_error()),
            Source::Api { status: 401, .. } => AppError::Weather(WeatherError::InvalidApiKey),
            Source::Api {
                status: 404,
                message,
            } => AppError::Weather(WeatherError::LocationNotFound(message)),
            Source::Api { status, .. } if status >= 500 => {
                AppError::Weather(WeatherError::ServiceUnavailable)
            }
            Source::Api { message, .. } => AppError::Weather(WeatherError::ApiError(message)),
            Source::Parse(message) => AppError::Network(NetworkError::InvalidResponse(message)),
            Source::Geocode(message) => AppError::Weather(WeatherError::ApiError(message)),
        }
    }
}

impl IntoAppError for skycast_weather::LocationError {
    fn into_app_error(self) -> AppError {
        use skycast_weather::LocationError as Source;

        match self {
            Source::PermissionDenied => AppError::Location(LocationError::PermissionDenied),
            Source::ServiceUnavailable => AppError::Location(LocationError::ServicesDisabled),
            Source::Other(message) => AppError::Location(LocationError::Unavailable(message)),
        }
    }
}

/// Error for a slot that failed with `message`.
pub fn slot_error(message: &str, query: Option<&str>) -> AppError {
    if message == skycast_weather::LOCATION_NOT_FOUND {
        let name = query.unwrap_or_default().to_string();
        AppError::Weather(WeatherError::LocationNotFound(name))
    } else {
        AppError::Weather(WeatherError::ApiError(message.to_string()))
    }
}

/// User message followed by the stored detail, e.g. the provider's own error text.
pub fn failure_line(error: &AppError, message: &str) -> String {
    let detail = message.trim();
    if detail.is_empty() || detail == skycast_weather::LOCATION_NOT_FOUND {
        error.user_message().to_string()
    } else {
        format!("{} ({})", error.user_message(), detail)
    }
}

/// Keep typed config failures typed; anything else is unexpected.
pub fn config_load_error(error: anyhow::Error) -> AppError {
    match error.downcast_ref::<ConfigError>() {
        Some(config) => AppError::Config(config.clone()),
        None => AppError::Other(error),
    }
}
