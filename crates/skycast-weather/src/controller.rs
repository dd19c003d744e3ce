//! Screen-scoped background loops.
//!
//! A [`ScreenController`] lives as long as the screen showing location
//! weather. It runs the tracking loop (initial fetch with retries, then the
//! battery-gated periodic refresh) and the device status poll. All of its
//! tasks share one cancellation token and stop together.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::coordinator::{FetchOutcome, WeatherFetchCoordinator};
use crate::location::LocationAcquirer;
use crate::refresh::RefreshPolicy;
use crate::status::{DeviceStatus, ScreenStatus};
use crate::types::{Coordinate, LocationError};

const EVENT_CAPACITY: usize = 32;

/// Timing knobs for the screen loops
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub acquire_timeout: Duration,
    pub retry_delay: Duration,
    pub refresh_tick: Duration,
    pub status_poll: Duration,
    pub policy: RefreshPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            refresh_tick: Duration::from_secs(1),
            status_poll: Duration::from_secs(5),
            policy: RefreshPolicy::default(),
        }
    }
}

/// Notifications for transient UI feedback (toasts, permission prompts)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// An acquisition attempt failed; another follows after the retry delay
    RetryingLocation { attempt: u32 },
    /// Location permission is missing; the UI should ask for it
    PermissionRequired,
    InitialFetchCompleted(FetchOutcome),
    RefreshCompleted(FetchOutcome),
}

struct Tracking {
    coordinator: Arc<WeatherFetchCoordinator>,
    acquirer: LocationAcquirer,
    device: Arc<dyn DeviceStatus>,
    settings: ControllerSettings,
    events: broadcast::Sender<ControllerEvent>,
    status: watch::Sender<ScreenStatus>,
    manual_refresh_running: AtomicBool,
}

// Clears the in-flight flag when a manual refresh ends or is cancelled.
struct ManualRefreshSlot<'a>(&'a AtomicBool);

impl Drop for ManualRefreshSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Tracking {
    fn emit(&self, event: ControllerEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Acquire until a usable fix arrives. Only a permission error ends the loop.
    async fn acquire_with_retry(&self) -> Result<Coordinate, LocationError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.acquirer.acquire(self.settings.acquire_timeout).await {
                Ok(acquisition) => {
                    if let Some(coordinate) = acquisition.usable() {
                        return Ok(coordinate);
                    }
                    tracing::debug!("Attempt {} produced no usable fix", attempt);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => tracing::debug!("Attempt {} failed: {}", attempt, e),
            }

            tracing::info!("Retrying to fetch location...");
            self.emit(ControllerEvent::RetryingLocation { attempt });
            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }

    async fn initial_fetch(&self) -> Result<(), LocationError> {
        if self.coordinator.session().has_completed_initial_fetch {
            return Ok(());
        }

        let coordinate = self.acquire_with_retry().await?;
        if self.coordinator.session().has_completed_initial_fetch {
            tracing::debug!("Initial fetch already done by a manual refresh");
            return Ok(());
        }
        let outcome = self.coordinator.fetch(coordinate).await;
        self.coordinator.mark_initial_fetch_completed();
        self.emit(ControllerEvent::InitialFetchCompleted(outcome));
        Ok(())
    }

    async fn periodic_refresh(&self) {
        let policy = self.settings.policy;
        let mut last_attempt = Instant::now();
        let mut permission_reported = false;

        loop {
            tokio::time::sleep(self.settings.refresh_tick).await;

            let status = ScreenStatus::read(self.device.as_ref());
            if !status.location_enabled {
                continue;
            }
            if !status.permission_granted {
                if !permission_reported {
                    self.emit(ControllerEvent::PermissionRequired);
                    permission_reported = true;
                }
                continue;
            }
            permission_reported = false;

            let now = Instant::now();
            let last = last_attempt.max(self.coordinator.session().last_fetch_timestamp);
            if !policy.should_fetch(status.battery_percent, now, last) {
                continue;
            }
            last_attempt = now;

            match self.acquirer.acquire(self.settings.acquire_timeout).await {
                Ok(acquisition) => match acquisition.usable() {
                    Some(coordinate) => {
                        let outcome = self.coordinator.fetch(coordinate).await;
                        self.emit(ControllerEvent::RefreshCompleted(outcome));
                    }
                    None => tracing::debug!("Periodic refresh skipped: no usable fix"),
                },
                Err(LocationError::PermissionDenied) => {
                    self.emit(ControllerEvent::PermissionRequired);
                }
                Err(e) => tracing::debug!("Periodic refresh skipped: {}", e),
            }
        }
    }

    async fn track(self: Arc<Self>) {
        match self.initial_fetch().await {
            Ok(()) => self.periodic_refresh().await,
            Err(e) => {
                tracing::warn!("Location tracking stopped: {}", e);
                self.emit(ControllerEvent::PermissionRequired);
            }
        }
    }

    async fn poll_status(self: Arc<Self>) {
        loop {
            let status = ScreenStatus::read(self.device.as_ref());
            self.status.send_if_modified(|current| {
                if *current == status {
                    false
                } else {
                    *current = status;
                    true
                }
            });
            tokio::time::sleep(self.settings.status_poll).await;
        }
    }

    async fn manual_refresh(self: Arc<Self>) {
        let _slot = ManualRefreshSlot(&self.manual_refresh_running);
        self.coordinator.suspend();
        match self.acquire_with_retry().await {
            Ok(coordinate) => {
                let outcome = self.coordinator.fetch(coordinate).await;
                if outcome == FetchOutcome::Success {
                    self.coordinator.mark_initial_fetch_completed();
                } else {
                    self.coordinator.resume();
                }
                self.emit(ControllerEvent::RefreshCompleted(outcome));
            }
            Err(e) => {
                tracing::warn!("Manual refresh stopped: {}", e);
                self.coordinator.resume();
                self.emit(ControllerEvent::PermissionRequired);
            }
        }
    }
}

/// Background work bound to one screen's lifetime.
///
/// Dropping the controller cancels every task it started, including any
/// in-flight location acquisition.
pub struct ScreenController {
    tracking: Arc<Tracking>,
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ScreenController {
    /// Start the tracking and status loops. Must be called inside a tokio runtime.
    pub fn start(
        coordinator: Arc<WeatherFetchCoordinator>,
        acquirer: LocationAcquirer,
        device: Arc<dyn DeviceStatus>,
        settings: ControllerSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ScreenStatus::read(device.as_ref()));

        let controller = Self {
            tracking: Arc::new(Tracking {
                coordinator,
                acquirer,
                device,
                settings,
                events,
                status,
                manual_refresh_running: AtomicBool::new(false),
            }),
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        };

        controller.spawn_scoped(controller.tracking.clone().track());
        controller.spawn_scoped(controller.tracking.clone().poll_status());
        tracing::info!("Screen controller started");
        controller
    }

    fn spawn_scoped<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = task => {}
            }
        });
    }

    pub fn coordinator(&self) -> &Arc<WeatherFetchCoordinator> {
        &self.tracking.coordinator
    }

    pub fn status(&self) -> watch::Receiver<ScreenStatus> {
        self.tracking.status.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.tracking.events.subscribe()
    }

    /// Manual refresh: blank the primary slot, re-acquire and fetch.
    ///
    /// Returns false if the controller is stopped or a manual refresh is
    /// already in flight.
    pub fn refresh(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        if self
            .tracking
            .manual_refresh_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Manual refresh already in flight");
            return false;
        }
        self.spawn_scoped(self.tracking.clone().manual_refresh());
        true
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Cancel all loops and wait for them to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Screen controller stopped");
    }
}

impl Drop for ScreenController {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
