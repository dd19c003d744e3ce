//! Device signals polled by the screen controller: location services,
//! location permission and battery level.

use std::fs;
use std::path::{Path, PathBuf};

use crate::refresh::{RefreshPolicy, UNKNOWN_BATTERY};

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Source of device status signals.
pub trait DeviceStatus: Send + Sync {
    fn location_services_enabled(&self) -> bool;

    fn location_permission_granted(&self) -> bool;

    /// Battery percentage, or `UNKNOWN_BATTERY` before the first reading.
    fn battery_percent(&self) -> i32;
}

/// Latest polled device status, published to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenStatus {
    pub location_enabled: bool,
    pub permission_granted: bool,
    pub battery_percent: i32,
}

impl Default for ScreenStatus {
    fn default() -> Self {
        Self {
            location_enabled: false,
            permission_granted: false,
            battery_percent: UNKNOWN_BATTERY,
        }
    }
}

impl ScreenStatus {
    pub fn read(status: &dyn DeviceStatus) -> Self {
        Self {
            location_enabled: status.location_services_enabled(),
            permission_granted: status.location_permission_granted(),
            battery_percent: status.battery_percent(),
        }
    }

    /// The manual refresh control is offered once the battery is known and
    /// too low for auto-refresh.
    pub fn manual_refresh_available(&self, policy: &RefreshPolicy) -> bool {
        self.location_enabled
            && self.battery_percent != UNKNOWN_BATTERY
            && policy.auto_refresh_disabled(self.battery_percent)
    }
}

/// Desktop status: location is always available, battery comes from sysfs.
#[derive(Debug, Clone)]
pub struct SystemDeviceStatus {
    battery_path: Option<PathBuf>,
}

impl SystemDeviceStatus {
    /// Uses the first `BAT*` entry under `/sys/class/power_supply`, if any.
    pub fn new() -> Self {
        Self {
            battery_path: find_battery(Path::new(POWER_SUPPLY_DIR)),
        }
    }

    /// Read the battery from an explicit power-supply directory.
    pub fn with_battery_path(path: impl Into<PathBuf>) -> Self {
        Self {
            battery_path: Some(path.into()),
        }
    }
}

impl Default for SystemDeviceStatus {
    fn default() -> Self {
        Self::new()
    }
}

fn find_battery(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut batteries: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("BAT"))
        .map(|e| e.path())
        .collect();
    batteries.sort();
    batteries.into_iter().next()
}

impl DeviceStatus for SystemDeviceStatus {
    fn location_services_enabled(&self) -> bool {
        true
    }

    fn location_permission_granted(&self) -> bool {
        true
    }

    fn battery_percent(&self) -> i32 {
        let Some(path) = &self.battery_path else {
            return UNKNOWN_BATTERY;
        };

        match fs::read_to_string(path.join("capacity")) {
            Ok(raw) => raw
                .trim()
                .parse::<i32>()
                .map(|p| p.clamp(0, 100))
                .unwrap_or(UNKNOWN_BATTERY),
            Err(e) => {
                tracing::debug!("Failed to read battery capacity: {}", e);
                UNKNOWN_BATTERY
            }
        }
    }
}
