//! Owner of all fetch state.
//!
//! Two independent slots are kept: the primary slot follows the device
//! location, the search slot holds the result of a name search. A slot only
//! reaches `Success` with both payloads from the same request; a failed
//! request leaves the previous snapshots in place.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::geocode::Geocoder;
use crate::provider::WeatherApi;
use crate::types::{
    Coordinate, CurrentConditions, FetchState, Forecast, ForecastSnapshot, WeatherError,
    WeatherSnapshot,
};

/// Error message stored when a name search resolves to nothing
pub const LOCATION_NOT_FOUND: &str = "Location not found";

/// Read-only copy of one state slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotView {
    pub state: FetchState,
    pub weather: Option<WeatherSnapshot>,
    pub forecast: Option<ForecastSnapshot>,
    pub error_message: Option<String>,
}

/// Bookkeeping for the location-tracking slot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshSession {
    /// `Coordinate::SENTINEL` until the first successful fetch
    pub last_fetched_coordinate: Coordinate,
    /// Session start until the first successful fetch
    pub last_fetch_timestamp: Instant,
    pub has_completed_initial_fetch: bool,
}

impl RefreshSession {
    fn new() -> Self {
        Self {
            last_fetched_coordinate: Coordinate::SENTINEL,
            last_fetch_timestamp: Instant::now(),
            has_completed_initial_fetch: false,
        }
    }
}

/// What a fetch request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    Failed,
    /// Dedup guard: data for this coordinate is already current
    Skipped,
    /// Sentinel coordinate, nothing requested
    Rejected,
}

#[derive(Clone, Copy)]
enum SlotKind {
    Primary,
    Search,
}

pub struct WeatherFetchCoordinator {
    api: Arc<dyn WeatherApi>,
    geocoder: Arc<dyn Geocoder>,
    primary: RwLock<SlotView>,
    search: RwLock<SlotView>,
    session: RwLock<RefreshSession>,
    // Primary state to return to if a suspended refresh is abandoned
    state_before_suspend: RwLock<FetchState>,
    epoch: AtomicU64,
    revision: watch::Sender<u64>,
}

impl WeatherFetchCoordinator {
    pub fn new(api: Arc<dyn WeatherApi>, geocoder: Arc<dyn Geocoder>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            api,
            geocoder,
            primary: RwLock::new(SlotView::default()),
            search: RwLock::new(SlotView::default()),
            session: RwLock::new(RefreshSession::new()),
            state_before_suspend: RwLock::new(FetchState::Idle),
            epoch: AtomicU64::new(0),
            revision,
        }
    }

    pub fn primary(&self) -> SlotView {
        self.primary.read().clone()
    }

    pub fn search(&self) -> SlotView {
        self.search.read().clone()
    }

    pub fn session(&self) -> RefreshSession {
        *self.session.read()
    }

    /// Ticks on every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn geocoder(&self) -> &Arc<dyn Geocoder> {
        &self.geocoder
    }

    fn slot(&self, kind: SlotKind) -> &RwLock<SlotView> {
        match kind {
            SlotKind::Primary => &self.primary,
            SlotKind::Search => &self.search,
        }
    }

    fn notify(&self) {
        self.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    /// Fetch weather and forecast for the device location into the primary slot.
    pub async fn fetch(&self, coordinate: Coordinate) -> FetchOutcome {
        let Some(coordinate) = coordinate.usable() else {
            tracing::warn!("Refusing to fetch weather for the no-fix sentinel");
            return FetchOutcome::Rejected;
        };

        if self.is_redundant(coordinate) {
            tracing::debug!("Skipping weather fetch: data already available for {}", coordinate);
            return FetchOutcome::Skipped;
        }

        tracing::info!("Fetching weather for coordinates: {}", coordinate);
        self.begin(SlotKind::Primary);
        let outcome = self.fetch_into(SlotKind::Primary, coordinate).await;

        if outcome == FetchOutcome::Success {
            let mut session = self.session.write();
            session.last_fetched_coordinate = coordinate;
            session.last_fetch_timestamp = Instant::now();
        }
        self.notify();
        outcome
    }

    /// Geocode `name` and fetch into the search slot; the primary slot is untouched.
    pub async fn search_by_name(&self, name: &str) -> FetchOutcome {
        let query = name.trim();
        tracing::info!("Fetching weather for location name: {}", query);
        self.begin(SlotKind::Search);

        let coordinate = if query.is_empty() {
            None
        } else {
            match self.geocoder.forward(query).await {
                Ok(found) => found.and_then(Coordinate::usable),
                Err(e) => {
                    tracing::error!("Geocoding error for {}: {}", query, e);
                    self.fail(SlotKind::Search, e.to_string());
                    return FetchOutcome::Failed;
                }
            }
        };

        let Some(coordinate) = coordinate else {
            tracing::error!("Location not found: {}", query);
            self.fail(SlotKind::Search, LOCATION_NOT_FOUND.to_string());
            return FetchOutcome::Failed;
        };

        let outcome = self.fetch_into(SlotKind::Search, coordinate).await;
        self.notify();
        outcome
    }

    /// Blank the primary slot ahead of a forced refresh.
    pub fn suspend(&self) {
        {
            let mut primary = self.primary.write();
            if primary.state != FetchState::Suspended {
                *self.state_before_suspend.write() = primary.state;
                primary.state = FetchState::Suspended;
            }
        }
        tracing::debug!("Primary weather state suspended");
        self.notify();
    }

    /// Undo [`suspend`](Self::suspend) when the refresh that followed it gives up.
    ///
    /// No-op unless the primary slot is still suspended.
    pub fn resume(&self) {
        {
            let mut primary = self.primary.write();
            if primary.state != FetchState::Suspended {
                return;
            }
            primary.state = *self.state_before_suspend.read();
        }
        tracing::debug!("Primary weather state restored after abandoned refresh");
        self.notify();
    }

    pub fn mark_initial_fetch_completed(&self) {
        self.session.write().has_completed_initial_fetch = true;
        tracing::debug!("Initial fetch completed");
        self.notify();
    }

    fn is_redundant(&self, coordinate: Coordinate) -> bool {
        let session = self.session();
        session.has_completed_initial_fetch
            && session.last_fetched_coordinate == coordinate
            && self.primary.read().state == FetchState::Success
    }

    fn begin(&self, kind: SlotKind) {
        {
            let mut slot = self.slot(kind).write();
            // A suspended slot stays blank until the new data lands.
            if slot.state != FetchState::Suspended {
                slot.state = FetchState::Loading;
            }
            slot.error_message = None;
        }
        self.notify();
    }

    fn fail(&self, kind: SlotKind, message: String) {
        {
            let mut slot = self.slot(kind).write();
            slot.state = FetchState::Failed;
            slot.error_message = Some(message);
        }
        self.notify();
    }

    async fn fetch_into(&self, kind: SlotKind, coordinate: Coordinate) -> FetchOutcome {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;

        match self.request_pair(coordinate).await {
            Ok((conditions, forecast)) => {
                let fetched_at = Utc::now();
                let name = conditions.name.clone().unwrap_or_default();
                let mut slot = self.slot(kind).write();
                slot.weather = Some(WeatherSnapshot {
                    coordinate,
                    fetched_at,
                    epoch,
                    conditions,
                });
                slot.forecast = Some(ForecastSnapshot {
                    coordinate,
                    fetched_at,
                    epoch,
                    forecast,
                });
                slot.state = FetchState::Success;
                slot.error_message = None;
                tracing::info!("Weather and forecast fetch successful: {}", name);
                FetchOutcome::Success
            }
            Err(e) => {
                tracing::error!("Weather fetch failed: {}", e);
                let mut slot = self.slot(kind).write();
                slot.state = FetchState::Failed;
                slot.error_message = Some(e.to_string());
                FetchOutcome::Failed
            }
        }
    }

    async fn request_pair(
        &self,
        coordinate: Coordinate,
    ) -> Result<(CurrentConditions, Forecast), WeatherError> {
        tokio::try_join!(self.api.current(coordinate), self.api.forecast(coordinate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeApi {
        current_calls: AtomicUsize,
        forecast_calls: AtomicUsize,
        fail_forecast: Mutex<bool>,
        fail_current: Mutex<bool>,
    }

    #[async_trait]
    impl WeatherApi for FakeApi {
        async fn current(&self, coordinate: Coordinate) -> Result<CurrentConditions, WeatherError> {
            self.current_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_current.lock() {
                return Err(WeatherError::Api {
                    status: 401,
                    message: "Invalid API key".into(),
                });
            }
            Ok(CurrentConditions {
                name: Some(format!("{}", coordinate.latitude)),
                ..Default::default()
            })
        }

        async fn forecast(&self, _coordinate: Coordinate) -> Result<Forecast, WeatherError> {
            self.forecast_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_forecast.lock() {
                return Err(WeatherError::Parse("truncated forecast".into()));
            }
            Ok(Forecast::default())
        }
    }

    struct FakeGeocoder {
        result: Result<Option<Coordinate>, String>,
        calls: AtomicUsize,
    }

    impl FakeGeocoder {
        fn returning(result: Result<Option<Coordinate>, String>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn forward(&self, _name: &str) -> Result<Option<Coordinate>, WeatherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(WeatherError::Geocode)
        }

        async fn reverse(&self, _coordinate: Coordinate) -> Result<Option<String>, WeatherError> {
            Ok(None)
        }
    }

    fn coordinator(api: Arc<FakeApi>) -> WeatherFetchCoordinator {
        WeatherFetchCoordinator::new(api, Arc::new(FakeGeocoder::returning(Ok(None))))
    }

    const LONDON: Coordinate = Coordinate {
        latitude: 51.5074,
        longitude: -0.1278,
    };

    #[tokio::test]
    async fn test_success_stores_both_snapshots_from_same_epoch() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        assert_eq!(coordinator.fetch(LONDON).await, FetchOutcome::Success);

        let primary = coordinator.primary();
        assert_eq!(primary.state, FetchState::Success);
        let weather = primary.weather.unwrap();
        let forecast = primary.forecast.unwrap();
        assert_eq!(weather.epoch, forecast.epoch);
        assert_eq!(weather.coordinate, LONDON);
        assert_eq!(forecast.coordinate, LONDON);
        assert_eq!(coordinator.session().last_fetched_coordinate, LONDON);
    }

    #[tokio::test]
    async fn test_sentinel_is_rejected_without_requests() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        assert_eq!(
            coordinator.fetch(Coordinate::SENTINEL).await,
            FetchOutcome::Rejected
        );
        assert_eq!(api.current_calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.primary().state, FetchState::Idle);
    }

    #[tokio::test]
    async fn test_repeat_fetch_after_success_is_skipped() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        coordinator.mark_initial_fetch_completed();
        assert_eq!(coordinator.fetch(LONDON).await, FetchOutcome::Skipped);

        assert_eq!(api.current_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.forecast_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeat_fetch_before_initial_completion_is_not_skipped() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        assert_eq!(coordinator.fetch(LONDON).await, FetchOutcome::Success);
        assert_eq!(api.current_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_moved_location_is_fetched() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        coordinator.mark_initial_fetch_completed();
        let paris = Coordinate::new(48.8566, 2.3522);
        assert_eq!(coordinator.fetch(paris).await, FetchOutcome::Success);
        assert_eq!(coordinator.session().last_fetched_coordinate, paris);
    }

    #[tokio::test]
    async fn test_forecast_failure_keeps_previous_pair() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        coordinator.mark_initial_fetch_completed();
        let before = coordinator.primary();

        *api.fail_forecast.lock() = true;
        let paris = Coordinate::new(48.8566, 2.3522);
        assert_eq!(coordinator.fetch(paris).await, FetchOutcome::Failed);

        let after = coordinator.primary();
        assert_eq!(after.state, FetchState::Failed);
        assert_eq!(
            after.error_message.as_deref(),
            Some("Parse error: truncated forecast")
        );
        assert_eq!(after.weather, before.weather);
        assert_eq!(after.forecast, before.forecast);
        assert_eq!(coordinator.session().last_fetched_coordinate, LONDON);
    }

    #[tokio::test]
    async fn test_first_fetch_failure_stores_no_snapshots() {
        let api = Arc::new(FakeApi::default());
        *api.fail_forecast.lock() = true;
        let coordinator = coordinator(api.clone());

        assert_eq!(coordinator.fetch(LONDON).await, FetchOutcome::Failed);
        let primary = coordinator.primary();
        assert!(primary.weather.is_none());
        assert!(primary.forecast.is_none());
    }

    #[tokio::test]
    async fn test_error_message_is_verbatim() {
        let api = Arc::new(FakeApi::default());
        *api.fail_current.lock() = true;
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        assert_eq!(
            coordinator.primary().error_message.as_deref(),
            Some("API error (401): Invalid API key")
        );
    }

    #[tokio::test]
    async fn test_suspend_blocks_dedup_and_holds_until_commit() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        coordinator.mark_initial_fetch_completed();
        coordinator.suspend();
        assert_eq!(coordinator.primary().state, FetchState::Suspended);

        assert_eq!(coordinator.fetch(LONDON).await, FetchOutcome::Success);
        assert_eq!(api.current_calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.primary().state, FetchState::Success);
    }

    #[tokio::test]
    async fn test_resume_restores_state_before_suspend() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.fetch(LONDON).await;
        coordinator.suspend();
        coordinator.suspend();
        coordinator.resume();

        let primary = coordinator.primary();
        assert_eq!(primary.state, FetchState::Success);
        assert!(primary.weather.is_some());
    }

    #[tokio::test]
    async fn test_resume_after_commit_is_a_no_op() {
        let api = Arc::new(FakeApi::default());
        let coordinator = coordinator(api.clone());

        coordinator.suspend();
        *api.fail_forecast.lock() = true;
        coordinator.fetch(LONDON).await;
        coordinator.resume();

        assert_eq!(coordinator.primary().state, FetchState::Failed);
    }

    #[tokio::test]
    async fn test_search_not_found_leaves_primary_alone() {
        let api = Arc::new(FakeApi::default());
        let geocoder = Arc::new(FakeGeocoder::returning(Ok(None)));
        let coordinator = WeatherFetchCoordinator::new(api.clone(), geocoder);

        coordinator.fetch(LONDON).await;
        let primary_before = coordinator.primary();

        assert_eq!(
            coordinator.search_by_name("Nowhereville").await,
            FetchOutcome::Failed
        );

        let search = coordinator.search();
        assert_eq!(search.state, FetchState::Failed);
        assert_eq!(search.error_message.as_deref(), Some(LOCATION_NOT_FOUND));
        assert_eq!(coordinator.primary(), primary_before);
        assert_eq!(api.current_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_geocode_error_is_distinct_from_not_found() {
        let api = Arc::new(FakeApi::default());
        let geocoder = Arc::new(FakeGeocoder::returning(Err("service down".into())));
        let coordinator = WeatherFetchCoordinator::new(api, geocoder);

        coordinator.search_by_name("Paris").await;
        assert_eq!(
            coordinator.search().error_message.as_deref(),
            Some("Geocoding error: service down")
        );
    }

    #[tokio::test]
    async fn test_search_success_fills_search_slot_only() {
        let api = Arc::new(FakeApi::default());
        let tokyo = Coordinate::new(35.6762, 139.6503);
        let geocoder = Arc::new(FakeGeocoder::returning(Ok(Some(tokyo))));
        let coordinator = WeatherFetchCoordinator::new(api, geocoder);

        assert_eq!(coordinator.search_by_name(" Tokyo ").await, FetchOutcome::Success);
        let search = coordinator.search();
        assert_eq!(search.state, FetchState::Success);
        assert_eq!(search.weather.unwrap().coordinate, tokyo);
        assert_eq!(coordinator.primary().state, FetchState::Idle);
        assert_eq!(
            coordinator.session().last_fetched_coordinate,
            Coordinate::SENTINEL
        );
    }

    #[tokio::test]
    async fn test_blank_search_skips_geocoder() {
        let geocoder = Arc::new(FakeGeocoder::returning(Ok(Some(LONDON))));
        let coordinator =
            WeatherFetchCoordinator::new(Arc::new(FakeApi::default()), geocoder.clone());

        assert_eq!(coordinator.search_by_name("   ").await, FetchOutcome::Failed);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            coordinator.search().error_message.as_deref(),
            Some(LOCATION_NOT_FOUND)
        );
    }

    #[tokio::test]
    async fn test_sentinel_geocode_result_is_not_found() {
        let api = Arc::new(FakeApi::default());
        let geocoder = Arc::new(FakeGeocoder::returning(Ok(Some(Coordinate::SENTINEL))));
        let coordinator = WeatherFetchCoordinator::new(api.clone(), geocoder);

        coordinator.search_by_name("Null Island").await;
        assert_eq!(
            coordinator.search().error_message.as_deref(),
            Some(LOCATION_NOT_FOUND)
        );
        assert_eq!(api.current_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let coordinator = coordinator(Arc::new(FakeApi::default()));
        let mut rx = coordinator.subscribe();
        let start = *rx.borrow_and_update();

        coordinator.fetch(LONDON).await;
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update() > start);
    }
}
