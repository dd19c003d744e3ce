//! Battery-aware auto-refresh gate.

use std::time::Duration;

use tokio::time::Instant;

/// Battery level reported before any reading has been observed
pub const UNKNOWN_BATTERY: i32 = -1;

/// Decides whether a periodic re-fetch is due.
///
/// Pure: callers own the clock and the last-fetch bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Interval above `high_battery_threshold`
    pub high_battery_interval: Duration,
    /// Interval within `low_battery_threshold..=high_battery_threshold`
    pub medium_battery_interval: Duration,
    pub high_battery_threshold: i32,
    pub low_battery_threshold: i32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            high_battery_interval: Duration::from_secs(30),
            medium_battery_interval: Duration::from_secs(120),
            high_battery_threshold: 60,
            low_battery_threshold: 30,
        }
    }
}

impl RefreshPolicy {
    /// Refresh interval for a battery level; `None` means never auto-refresh.
    ///
    /// Unknown (`-1`) and low levels both disable auto-refresh.
    pub fn interval(&self, battery_percent: i32) -> Option<Duration> {
        if battery_percent > self.high_battery_threshold {
            Some(self.high_battery_interval)
        } else if battery_percent >= self.low_battery_threshold {
            Some(self.medium_battery_interval)
        } else {
            None
        }
    }

    /// True once `elapsed` reaches the interval for `battery_percent`.
    pub fn is_due(&self, battery_percent: i32, elapsed: Duration) -> bool {
        self.interval(battery_percent)
            .is_some_and(|interval| elapsed >= interval)
    }

    pub fn should_fetch(&self, battery_percent: i32, now: Instant, last_fetch: Instant) -> bool {
        self.is_due(battery_percent, now.saturating_duration_since(last_fetch))
    }

    /// Auto-refresh is off, so the user needs a manual refresh control.
    pub fn auto_refresh_disabled(&self, battery_percent: i32) -> bool {
        self.interval(battery_percent).is_none()
    }
}
