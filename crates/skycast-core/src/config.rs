use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "SKYCAST_API_KEY";

const MIN_FONT_SCALE: f32 = 0.5;
const MAX_FONT_SCALE: f32 = 1.5;
const FONT_SCALE_STEP: f32 = 0.1;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Weather provider settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Location acquisition and refresh timing
    #[serde(default)]
    pub location: LocationConfig,

    /// Display preferences
    #[serde(default)]
    pub ui: UiConfig,
}

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Metric,
    Imperial,
    Standard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// Base URL of the OpenWeatherMap data API
    pub api_base_url: String,

    /// OpenWeatherMap API key (falls back to SKYCAST_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Units passed to the provider
    #[serde(default)]
    pub units: TemperatureUnit,

    /// Base URL of the Nominatim geocoding service
    pub geocoding_url: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            api_key: None,
            units: TemperatureUnit::Metric,
            geocoding_url: "https://nominatim.openstreetmap.org".to_string(),
        }
    }
}

impl WeatherConfig {
    /// API key from the config file, or from the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Where device coordinates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationSourceKind {
    /// IP geolocation lookup
    #[default]
    Ip,
    /// Configured latitude/longitude
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub source: LocationSourceKind,

    /// Used when `source = "fixed"`
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,

    /// Bound on a single location fix
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Pause between failed initial acquisitions
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Period of the refresh policy check
    #[serde(default = "default_refresh_tick_secs")]
    pub refresh_tick_secs: u64,

    /// Period of the device status poll
    #[serde(default = "default_status_poll_secs")]
    pub status_poll_secs: u64,
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_refresh_tick_secs() -> u64 {
    1
}

fn default_status_poll_secs() -> u64 {
    5
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            source: LocationSourceKind::Ip,
            latitude: None,
            longitude: None,
            acquire_timeout_secs: default_acquire_timeout_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            refresh_tick_secs: default_refresh_tick_secs(),
            status_poll_secs: default_status_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Dark mode enabled
    pub dark_mode: bool,

    /// Text scale factor, clamped to 0.5..=1.5
    pub font_scale: f32,

    /// Display language code (e.g. "en")
    pub language: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            dark_mode: false,
            font_scale: 1.0,
            language: "en".to_string(),
        }
    }
}

impl UiConfig {
    pub fn toggle_dark_mode(&mut self) -> bool {
        self.dark_mode = !self.dark_mode;
        tracing::debug!("Dark mode toggled to: {}", self.dark_mode);
        self.dark_mode
    }

    pub fn increase_font_scale(&mut self) -> f32 {
        self.font_scale = round_scale(self.font_scale + FONT_SCALE_STEP).min(MAX_FONT_SCALE);
        tracing::debug!("Font scale increased to: {}", self.font_scale);
        self.font_scale
    }

    pub fn decrease_font_scale(&mut self) -> f32 {
        self.font_scale = round_scale(self.font_scale - FONT_SCALE_STEP).max(MIN_FONT_SCALE);
        tracing::debug!("Font scale decreased to: {}", self.font_scale);
        self.font_scale
    }

    pub fn can_increase_font_scale(&self) -> bool {
        self.font_scale < MAX_FONT_SCALE
    }

    pub fn can_decrease_font_scale(&self) -> bool {
        self.font_scale > MIN_FONT_SCALE
    }

    /// Label shown next to the font size controls
    pub fn font_size_label(&self) -> &'static str {
        if self.font_scale <= 0.8 {
            "Small"
        } else if self.font_scale <= 1.0 {
            "Medium"
        } else {
            "Large"
        }
    }

    pub fn set_language(&mut self, code: impl Into<String>) {
        self.language = code.into();
        tracing::debug!("Language set to: {}", self.language);
    }
}

// Keeps repeated 0.1 steps from drifting (1.0 + 0.1 + 0.1 ...).
fn round_scale(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            weather: WeatherConfig::default(),
            location: LocationConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the user config directory, creating a default file if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating a default file if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.weather.api_base_url, "weather.api_base_url", &mut result);
        self.validate_url(&self.weather.geocoding_url, "weather.geocoding_url", &mut result);

        if self.weather.resolved_api_key().is_none() {
            result.add_warning(
                "weather.api_key",
                format!("No API key configured (set it here or via {})", API_KEY_ENV),
            );
        }

        if self.location.source == LocationSourceKind::Fixed {
            match (self.location.latitude, self.location.longitude) {
                (Some(lat), Some(lon)) => {
                    if !(-90.0..=90.0).contains(&lat) {
                        result.add_error("location.latitude", "Latitude must be within -90..=90");
                    }
                    if !(-180.0..=180.0).contains(&lon) {
                        result.add_error(
                            "location.longitude",
                            "Longitude must be within -180..=180",
                        );
                    }
                    if lat == 0.0 && lon == 0.0 {
                        result.add_error(
                            "location",
                            "0,0 is reserved for \"no fix\" and cannot be used",
                        );
                    }
                }
                _ => result.add_error(
                    "location",
                    "Fixed location source requires latitude and longitude",
                ),
            }
        }

        if self.location.acquire_timeout_secs == 0 {
            result.add_error(
                "location.acquire_timeout_secs",
                "Acquisition timeout must be greater than 0",
            );
        }

        if self.location.retry_delay_secs == 0 {
            result.add_warning(
                "location.retry_delay_secs",
                "Retrying without delay will poll the location source continuously",
            );
        }

        if self.location.refresh_tick_secs == 0 {
            result.add_error(
                "location.refresh_tick_secs",
                "Refresh tick must be greater than 0",
            );
        }

        if self.location.status_poll_secs == 0 {
            result.add_error(
                "location.status_poll_secs",
                "Status poll interval must be greater than 0",
            );
        }

        if !(MIN_FONT_SCALE..=MAX_FONT_SCALE).contains(&self.ui.font_scale) {
            result.add_warning(
                "ui.font_scale",
                format!(
                    "Font scale {} is outside {}..={} and will be clamped",
                    self.ui.font_scale, MIN_FONT_SCALE, MAX_FONT_SCALE
                ),
            );
        }

        if self.ui.language.trim().is_empty() {
            result.add_error("ui.language", "Language code cannot be empty");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the user config directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.weather.api_base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "weather.api_base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.weather.geocoding_url = "ftp://nominatim.example".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_fixed_source_requires_coordinates() {
        let mut config = Config::default();
        config.location.source = LocationSourceKind::Fixed;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "location"));

        config.location.latitude = Some(51.5);
        config.location.longitude = Some(-0.12);
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_fixed_source_rejects_sentinel() {
        let mut config = Config::default();
        config.location.source = LocationSourceKind::Fixed;
        config.location.latitude = Some(0.0);
        config.location.longitude = Some(0.0);
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.message.contains("no fix")));
    }

    #[test]
    fn test_zero_tick_is_error() {
        let mut config = Config::default();
        config.location.refresh_tick_secs = 0;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "location.refresh_tick_secs"));
    }

    #[test]
    fn test_font_scale_is_clamped() {
        let mut ui = UiConfig::default();
        for _ in 0..10 {
            ui.increase_font_scale();
        }
        assert_eq!(ui.font_scale, 1.5);
        assert!(!ui.can_increase_font_scale());
        assert_eq!(ui.font_size_label(), "Large");

        for _ in 0..20 {
            ui.decrease_font_scale();
        }
        assert_eq!(ui.font_scale, 0.5);
        assert!(!ui.can_decrease_font_scale());
        assert_eq!(ui.font_size_label(), "Small");
    }

    #[test]
    fn test_font_size_labels() {
        let mut ui = UiConfig::default();
        assert_eq!(ui.font_size_label(), "Medium");
        ui.decrease_font_scale();
        ui.decrease_font_scale();
        assert_eq!(ui.font_scale, 0.8);
        assert_eq!(ui.font_size_label(), "Small");
    }

    #[test]
    fn test_toggle_dark_mode_and_language() {
        let mut ui = UiConfig::default();
        assert!(ui.toggle_dark_mode());
        assert!(!ui.toggle_dark_mode());
        ui.set_language("fr");
        assert_eq!(ui.language, "fr");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [location]
            source = "fixed"
            latitude = 48.85
            longitude = 2.35
            "#,
        )
        .unwrap();
        assert_eq!(config.location.source, LocationSourceKind::Fixed);
        assert_eq!(config.location.acquire_timeout_secs, 5);
        assert_eq!(config.ui.language, "en");
        assert_eq!(config.weather.units, TemperatureUnit::Metric);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
