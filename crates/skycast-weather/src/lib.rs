//! Weather service for SkyCast
//!
//! Acquires the device location, fetches current conditions and the forecast
//! from OpenWeatherMap, and keeps the results in a single coordinator that the
//! presentation layer reads from.

pub mod controller;
pub mod coordinator;
pub mod format;
pub mod geocode;
pub mod location;
pub mod provider;
pub mod refresh;
pub mod status;
pub mod types;

pub use controller::{ControllerEvent, ControllerSettings, ScreenController};
pub use coordinator::{
    FetchOutcome, RefreshSession, SlotView, WeatherFetchCoordinator, LOCATION_NOT_FOUND,
};
pub use geocode::{display_name, Geocoder, NominatimGeocoder};
pub use location::{
    Acquisition, FixedLocationSource, IpLocationSource, ListenerId, LocationAcquirer,
    LocationListener, LocationSource,
};
pub use provider::{OpenWeatherProvider, WeatherApi};
pub use refresh::{RefreshPolicy, UNKNOWN_BATTERY};
pub use status::{DeviceStatus, ScreenStatus, SystemDeviceStatus};
pub use types::*;
