//! Single-shot location acquisition on top of a streaming location source.
//!
//! A [`LocationSource`] pushes fixes to every registered listener until the
//! listener is deregistered. [`LocationAcquirer::acquire`] registers exactly
//! one listener, waits for the first fix or the timeout, and always
//! deregisters, including when the returned future is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{Coordinate, LocationError};

const IP_LOOKUP_URL: &str = "http://ip-api.com/json/";
const IP_LOOKUP_TIMEOUT_SECS: u64 = 5;

/// Handle identifying one registration with a [`LocationSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic id allocator for location sources
#[derive(Debug, Default)]
pub struct ListenerIds(AtomicU64);

impl ListenerIds {
    pub fn next(&self) -> ListenerId {
        ListenerId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Receiving end handed to a location source on registration.
#[derive(Debug, Clone)]
pub struct LocationListener {
    tx: mpsc::Sender<Coordinate>,
}

impl LocationListener {
    /// Deliver a fix. Returns false once the listener can no longer receive.
    pub fn deliver(&self, coordinate: Coordinate) -> bool {
        match self.tx.try_send(coordinate) {
            Ok(()) => true,
            // A fix is already waiting; the acquirer only takes the first one.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Streaming platform location service.
pub trait LocationSource: Send + Sync {
    /// Start delivering fixes to `listener`.
    fn register(&self, listener: LocationListener) -> Result<ListenerId, LocationError>;

    /// Stop delivering fixes for `id`. Unknown ids are ignored.
    fn unregister(&self, id: ListenerId);
}

/// Outcome of one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acquisition {
    Fix(Coordinate),
    Timeout,
}

impl Acquisition {
    /// The fix, if one arrived and it is not the sentinel.
    pub fn usable(self) -> Option<Coordinate> {
        match self {
            Acquisition::Fix(c) => c.usable(),
            Acquisition::Timeout => None,
        }
    }
}

// Deregisters on drop so an abandoned acquisition never leaks a listener.
struct Registration<'a> {
    source: &'a dyn LocationSource,
    id: ListenerId,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        tracing::trace!("Deregistering location listener {}", self.id.value());
        self.source.unregister(self.id);
    }
}

/// Wraps a [`LocationSource`] into a timeout-bounded single fix.
#[derive(Clone)]
pub struct LocationAcquirer {
    source: Arc<dyn LocationSource>,
}

impl LocationAcquirer {
    pub fn new(source: Arc<dyn LocationSource>) -> Self {
        Self { source }
    }

    /// Wait for the first fix, or `Acquisition::Timeout` once `timeout` elapses.
    ///
    /// # Errors
    /// `PermissionDenied` if registration is refused, `ServiceUnavailable` if the
    /// source drops the listener before producing a fix.
    pub async fn acquire(&self, timeout: Duration) -> Result<Acquisition, LocationError> {
        let (tx, mut rx) = mpsc::channel(1);
        let id = self.source.register(LocationListener { tx })?;
        let _registration = Registration {
            source: self.source.as_ref(),
            id,
        };

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(coordinate)) => {
                tracing::debug!("Location fix: {}", coordinate);
                Ok(Acquisition::Fix(coordinate))
            }
            Ok(None) => {
                tracing::warn!("Location source closed listener {} without a fix", id.value());
                Err(LocationError::ServiceUnavailable)
            }
            Err(_) => {
                tracing::debug!("No location fix within {:?}", timeout);
                Ok(Acquisition::Timeout)
            }
        }
    }
}

/// Delivers a configured coordinate to every listener as soon as it registers.
#[derive(Debug)]
pub struct FixedLocationSource {
    coordinate: Coordinate,
    ids: ListenerIds,
}

impl FixedLocationSource {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            ids: ListenerIds::default(),
        }
    }
}

impl LocationSource for FixedLocationSource {
    fn register(&self, listener: LocationListener) -> Result<ListenerId, LocationError> {
        listener.deliver(self.coordinate);
        Ok(self.ids.next())
    }

    fn unregister(&self, _id: ListenerId) {}
}

#[derive(Debug, Deserialize)]
struct IpLookupResponse {
    status: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
}

/// Approximate location from an IP geolocation lookup.
///
/// Each registration runs one lookup task; deregistering aborts it.
/// Must be registered from within a tokio runtime.
pub struct IpLocationSource {
    client: Client,
    url: String,
    ids: ListenerIds,
    lookups: Mutex<HashMap<ListenerId, JoinHandle<()>>>,
}

impl IpLocationSource {
    pub fn new() -> Result<Self, LocationError> {
        Self::with_url(IP_LOOKUP_URL)
    }

    pub fn with_url(url: &str) -> Result<Self, LocationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(IP_LOOKUP_TIMEOUT_SECS))
            .build()
            .map_err(|e| LocationError::Other(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            ids: ListenerIds::default(),
            lookups: Mutex::new(HashMap::new()),
        })
    }

    /// Number of lookups that have not been deregistered yet
    pub fn active_lookups(&self) -> usize {
        self.lookups.lock().len()
    }
}

async fn lookup(client: Client, url: String) -> Option<Coordinate> {
    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("IP location request failed: {}", e);
            return None;
        }
    };

    if !response.status().is_success() {
        tracing::debug!("IP location lookup returned status {}", response.status());
        return None;
    }

    let body: IpLookupResponse = match response.json().await {
        Ok(b) => b,
        Err(e) => {
            tracing::debug!("IP location parse error: {}", e);
            return None;
        }
    };

    if body.status.as_deref().is_some_and(|s| s != "success") {
        tracing::debug!("IP location lookup reported status {:?}", body.status);
        return None;
    }

    let coordinate = Coordinate::new(body.lat?, body.lon?);
    tracing::info!(
        "IP location resolved to {} ({})",
        coordinate,
        body.city.as_deref().unwrap_or("unknown city")
    );
    Some(coordinate)
}

impl LocationSource for IpLocationSource {
    fn register(&self, listener: LocationListener) -> Result<ListenerId, LocationError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LocationError::ServiceUnavailable)?;
        let id = self.ids.next();
        let client = self.client.clone();
        let url = self.url.clone();

        let handle = runtime.spawn(async move {
            match lookup(client, url).await {
                Some(coordinate) => {
                    listener.deliver(coordinate);
                }
                // Stay registered and silent until aborted so the acquirer times out.
                None => std::future::pending::<()>().await,
            }
        });

        self.lookups.lock().insert(id, handle);
        Ok(id)
    }

    fn unregister(&self, id: ListenerId) {
        if let Some(handle) = self.lookups.lock().remove(&id) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SilentSource {
        ids: ListenerIds,
        active: Mutex<Vec<ListenerId>>,
        // Keeps listeners alive so the channel does not close.
        held: Mutex<Vec<LocationListener>>,
    }

    impl SilentSource {
        fn new() -> Self {
            Self {
                ids: ListenerIds::default(),
                active: Mutex::new(Vec::new()),
                held: Mutex::new(Vec::new()),
            }
        }
    }

    impl LocationSource for SilentSource {
        fn register(&self, listener: LocationListener) -> Result<ListenerId, LocationError> {
            let id = self.ids.next();
            self.active.lock().push(id);
            self.held.lock().push(listener);
            Ok(id)
        }

        fn unregister(&self, id: ListenerId) {
            self.active.lock().retain(|x| *x != id);
        }
    }

    struct DeniedSource;

    impl LocationSource for DeniedSource {
        fn register(&self, _listener: LocationListener) -> Result<ListenerId, LocationError> {
            Err(LocationError::PermissionDenied)
        }

        fn unregister(&self, _id: ListenerId) {}
    }

    struct DroppingSource {
        ids: ListenerIds,
    }

    impl LocationSource for DroppingSource {
        fn register(&self, listener: LocationListener) -> Result<ListenerId, LocationError> {
            drop(listener);
            Ok(self.ids.next())
        }

        fn unregister(&self, _id: ListenerId) {}
    }

    #[tokio::test]
    async fn test_fixed_source_delivers_immediately() {
        let coordinate = Coordinate::new(40.7128, -74.006);
        let acquirer = LocationAcquirer::new(Arc::new(FixedLocationSource::new(coordinate)));
        let result = acquirer.acquire(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, Acquisition::Fix(coordinate));
        assert_eq!(result.usable(), Some(coordinate));
    }

    #[tokio::test]
    async fn test_sentinel_fix_is_returned_but_not_usable() {
        let acquirer =
            LocationAcquirer::new(Arc::new(FixedLocationSource::new(Coordinate::SENTINEL)));
        let result = acquirer.acquire(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, Acquisition::Fix(Coordinate::SENTINEL));
        assert_eq!(result.usable(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_source_times_out_and_deregisters() {
        let source = Arc::new(SilentSource::new());
        let acquirer = LocationAcquirer::new(source.clone());
        let started = tokio::time::Instant::now();

        let result = acquirer.acquire(Duration::from_secs(5)).await.unwrap();

        assert_eq!(result, Acquisition::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(source.active.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_acquisition_deregisters() {
        let source = Arc::new(SilentSource::new());
        let acquirer = LocationAcquirer::new(source.clone());

        let pending = tokio::spawn({
            let acquirer = acquirer.clone();
            async move { acquirer.acquire(Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.active.lock().len(), 1);

        pending.abort();
        let _ = pending.await;
        assert!(source.active.lock().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_is_an_error() {
        let acquirer = LocationAcquirer::new(Arc::new(DeniedSource));
        let err = acquirer.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, LocationError::PermissionDenied);
    }

    #[tokio::test]
    async fn test_closed_listener_is_service_unavailable() {
        let acquirer = LocationAcquirer::new(Arc::new(DroppingSource {
            ids: ListenerIds::default(),
        }));
        let err = acquirer.acquire(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(err, LocationError::ServiceUnavailable);
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let ids = ListenerIds::default();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
    }
}
