//! Display helpers for provider payloads.

use chrono::{DateTime, FixedOffset, Utc};

use crate::types::{CurrentConditions, ForecastEntry, Units};

const ICON_BASE_URL: &str = "https://openweathermap.org/img/wn";

/// Placeholder for values the provider did not send
pub const NOT_AVAILABLE: &str = "N/A";

/// Icon URL for a provider icon code such as `"10d"`.
pub fn icon_url(icon: &str, large: bool) -> String {
    if large {
        format!("{}/{}@4x.png", ICON_BASE_URL, icon)
    } else {
        format!("{}/{}.png", ICON_BASE_URL, icon)
    }
}

/// Format a unix timestamp in the location's UTC offset (seconds).
///
/// Returns `None` for out-of-range timestamps or offsets.
pub fn format_timestamp(unix_secs: i64, utc_offset_secs: i32, pattern: &str) -> Option<String> {
    let offset = FixedOffset::east_opt(utc_offset_secs)?;
    let utc = DateTime::<Utc>::from_timestamp(unix_secs, 0)?;
    Some(utc.with_timezone(&offset).format(pattern).to_string())
}

fn temperature(value: Option<f64>, units: Units) -> String {
    value
        .map(|t| format!("{:.1}{}", t, units.temperature_suffix()))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// One-line summary such as `"London: 14.2°C, light rain"`.
pub fn summarize_current(conditions: &CurrentConditions, units: Units) -> String {
    let name = conditions.name.as_deref().unwrap_or(NOT_AVAILABLE);
    let temp = temperature(conditions.main.as_ref().and_then(|m| m.temp), units);
    match conditions
        .primary_condition()
        .and_then(|c| c.description.as_deref())
    {
        Some(description) => format!("{}: {}, {}", name, temp, description),
        None => format!("{}: {}", name, temp),
    }
}

/// One forecast row: local time, temperature and chance of precipitation.
pub fn summarize_forecast_entry(entry: &ForecastEntry, utc_offset_secs: i32, units: Units) -> String {
    let when = entry
        .dt
        .and_then(|dt| format_timestamp(dt, utc_offset_secs, "%a %H:%M"))
        .or_else(|| entry.dt_txt.clone())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let temp = temperature(entry.main.as_ref().and_then(|m| m.temp), units);
    let pop = entry
        .pop
        .map(|p| format!("{:.0}%", (p.clamp(0.0, 1.0) * 100.0).round()))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    format!("{}  {}  {}", when, temp, pop)
}
