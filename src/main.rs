mod error_mapping;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use skycast_core::config::API_KEY_ENV;
use skycast_core::{AppError, Config, ConfigError, LocationSourceKind, TemperatureUnit};
use skycast_weather::format::{summarize_current, summarize_forecast_entry};
use skycast_weather::{
    display_name, ControllerEvent, ControllerSettings, Coordinate, FetchState,
    FixedLocationSource, IpLocationSource, LocationAcquirer, LocationSource, NominatimGeocoder,
    OpenWeatherProvider, RefreshPolicy, ScreenController, SlotView, SystemDeviceStatus, Units,
    WeatherFetchCoordinator,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::error_mapping::{config_load_error, failure_line, slot_error, IntoAppError};

/// Forecast rows printed under the current conditions (3-hour steps)
const FORECAST_ROWS: usize = 8;

#[derive(Parser, Debug)]
#[command(name = "skycast")]
#[command(about = "Weather for where you are, refreshed with your battery in mind")]
struct Args {
    /// Config file to use instead of the one in the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the device location and print weather as it refreshes (Enter forces a refresh)
    Track,
    /// Look up the weather for a place name
    Search {
        /// Place name, e.g. "Paris" or "Springfield, IL"
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Fetch the weather for the current location once
    Refresh,
    /// Show or change display preferences
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// Toggle dark mode
    DarkMode,
    /// Increase the font scale by one step
    FontUp,
    /// Decrease the font scale by one step
    FontDown,
    /// Set the display language (e.g. "en", "de")
    Language { code: String },
}

struct Services {
    coordinator: Arc<WeatherFetchCoordinator>,
    acquirer: LocationAcquirer,
    settings: ControllerSettings,
    units: Units,
}

fn units_for(unit: TemperatureUnit) -> Units {
    match unit {
        TemperatureUnit::Metric => Units::Metric,
        TemperatureUnit::Imperial => Units::Imperial,
        TemperatureUnit::Standard => Units::Standard,
    }
}

fn build_services(config: &Config) -> Result<Services, AppError> {
    let api_key = config.weather.resolved_api_key().ok_or_else(|| {
        AppError::Config(ConfigError::MissingSetting(format!(
            "weather.api_key (or {})",
            API_KEY_ENV
        )))
    })?;
    let units = units_for(config.weather.units);
    let language = config.ui.language.clone();

    let provider = OpenWeatherProvider::with_base_url(&config.weather.api_base_url, api_key, units)
        .map_err(IntoAppError::into_app_error)?
        .with_language(language.clone());
    let geocoder = NominatimGeocoder::with_base_url(&config.weather.geocoding_url, &language)
        .map_err(IntoAppError::into_app_error)?;

    let source: Arc<dyn LocationSource> = match config.location.source {
        LocationSourceKind::Fixed => {
            let (Some(latitude), Some(longitude)) =
                (config.location.latitude, config.location.longitude)
            else {
                return Err(AppError::Config(ConfigError::MissingSetting(
                    "location.latitude / location.longitude".to_string(),
                )));
            };
            Arc::new(FixedLocationSource::new(Coordinate::new(latitude, longitude)))
        }
        LocationSourceKind::Ip => {
            Arc::new(IpLocationSource::new().map_err(IntoAppError::into_app_error)?)
        }
    };

    let location = &config.location;
    let settings = ControllerSettings {
        acquire_timeout: Duration::from_secs(location.acquire_timeout_secs),
        retry_delay: Duration::from_secs(location.retry_delay_secs),
        refresh_tick: Duration::from_secs(location.refresh_tick_secs),
        status_poll: Duration::from_secs(location.status_poll_secs),
        policy: RefreshPolicy::default(),
    };

    Ok(Services {
        coordinator: Arc::new(WeatherFetchCoordinator::new(
            Arc::new(provider),
            Arc::new(geocoder),
        )),
        acquirer: LocationAcquirer::new(source),
        settings,
        units,
    })
}

fn report(error: AppError) -> anyhow::Error {
    tracing::error!("{}", error);
    eprintln!("{}", error.user_message());
    error.into()
}

fn report_slot(message: &str, query: Option<&str>) -> anyhow::Error {
    let error = slot_error(message, query);
    tracing::error!("{}", error);
    eprintln!("{}", failure_line(&error, message));
    error.into()
}

async fn print_slot(services: &Services, slot: &SlotView) {
    let (Some(weather), Some(forecast)) = (&slot.weather, &slot.forecast) else {
        return;
    };

    let place = display_name(services.coordinator.geocoder().as_ref(), weather.coordinate).await;
    println!();
    println!("{}  (updated {})", place, weather.fetched_at.format("%H:%M:%S UTC"));
    println!("  {}", summarize_current(&weather.conditions, services.units));

    let offset = forecast
        .forecast
        .city
        .as_ref()
        .and_then(|c| c.timezone)
        .or(weather.conditions.timezone)
        .unwrap_or(0);
    for entry in forecast.forecast.list.iter().take(FORECAST_ROWS) {
        println!("    {}", summarize_forecast_entry(entry, offset, services.units));
    }
}

async fn track(services: Services) -> Result<()> {
    let coordinator = services.coordinator.clone();
    let policy = services.settings.policy;
    let controller = ScreenController::start(
        coordinator.clone(),
        services.acquirer.clone(),
        Arc::new(SystemDeviceStatus::new()),
        services.settings.clone(),
    );

    let mut events = controller.events();
    let mut revisions = coordinator.subscribe();
    let mut status = controller.status();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_shown: Option<SlotView> = None;

    println!("Tracking location weather. Press Enter to refresh, Ctrl+C to quit.");
    let initial = *status.borrow_and_update();
    if policy.auto_refresh_disabled(initial.battery_percent) {
        println!("Automatic refresh is paused at this battery level.");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ControllerEvent::RetryingLocation { attempt }) => {
                    println!("Retrying to fetch location... (attempt {})", attempt);
                }
                Ok(ControllerEvent::PermissionRequired) => {
                    eprintln!("{}", skycast_weather::LocationError::PermissionDenied.into_app_error().user_message());
                }
                Ok(event) => tracing::debug!("Controller event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Missed {} controller events", skipped),
                Err(RecvError::Closed) => break,
            },
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let primary = coordinator.primary();
                if last_shown.as_ref() == Some(&primary) {
                    continue;
                }
                match primary.state {
                    FetchState::Success => print_slot(&services, &primary).await,
                    FetchState::Failed => {
                        let message = primary.error_message.as_deref().unwrap_or_default();
                        eprintln!("{}", failure_line(&slot_error(message, None), message));
                    }
                    FetchState::Suspended => println!("Refreshing..."),
                    FetchState::Idle | FetchState::Loading => continue,
                }
                last_shown = Some(primary);
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if !current.location_enabled {
                    eprintln!("Location services are not enabled. Please enable location to view weather data.");
                } else if current.manual_refresh_available(&policy) {
                    println!(
                        "Battery at {}%: automatic refresh paused, press Enter to refresh.",
                        current.battery_percent
                    );
                }
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    if !controller.refresh() {
                        println!("A refresh is already in progress.");
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn refresh_once(services: Services) -> Result<()> {
    let coordinator = services.coordinator.clone();
    let controller = ScreenController::start(
        coordinator.clone(),
        services.acquirer.clone(),
        Arc::new(SystemDeviceStatus::new()),
        services.settings.clone(),
    );
    let mut events = controller.events();

    let completed = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break false,
            event = events.recv() => match event {
                Ok(ControllerEvent::InitialFetchCompleted(_)) => break true,
                Ok(ControllerEvent::RetryingLocation { attempt }) => {
                    println!("Retrying to fetch location... (attempt {})", attempt);
                }
                Ok(ControllerEvent::PermissionRequired) => {
                    controller.shutdown().await;
                    return Err(report(
                        skycast_weather::LocationError::PermissionDenied.into_app_error(),
                    ));
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break false,
            },
        }
    };
    controller.shutdown().await;

    if !completed {
        return Ok(());
    }

    let primary = coordinator.primary();
    match primary.state {
        FetchState::Success => {
            print_slot(&services, &primary).await;
            Ok(())
        }
        _ => {
            let message = primary.error_message.as_deref().unwrap_or_default();
            Err(report_slot(message, None))
        }
    }
}

async fn search(services: Services, name: &str) -> Result<()> {
    services.coordinator.search_by_name(name).await;

    let slot = services.coordinator.search();
    match slot.state {
        FetchState::Success => {
            print_slot(&services, &slot).await;
            Ok(())
        }
        _ => {
            let message = slot.error_message.as_deref().unwrap_or_default();
            Err(report_slot(message, Some(name)))
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

fn save_config(config: &Config, path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => config.save_to(p),
        None => config.save(),
    }
}

fn configure(action: Option<ConfigAction>, path: Option<&Path>) -> Result<()> {
    let mut config = load_config(path)?;
    let ui = &mut config.ui;

    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let location = match path {
                Some(p) => p.to_path_buf(),
                None => Config::config_path()?,
            };
            println!("Config file: {}", location.display());
            println!("  Dark mode: {}", if ui.dark_mode { "on" } else { "off" });
            println!("  Font size: {} ({:.1}x)", ui.font_size_label(), ui.font_scale);
            println!("  Language:  {}", ui.language);
            println!("  Units:     {:?}", config.weather.units);
            println!("  Location:  {:?}", config.location.source);
            return Ok(());
        }
        ConfigAction::DarkMode => {
            let enabled = ui.toggle_dark_mode();
            println!("Dark mode {}", if enabled { "enabled" } else { "disabled" });
        }
        ConfigAction::FontUp => {
            if !ui.can_increase_font_scale() {
                println!("Font size is already at the maximum");
                return Ok(());
            }
            ui.increase_font_scale();
            println!("Font size: {} ({:.1}x)", ui.font_size_label(), ui.font_scale);
        }
        ConfigAction::FontDown => {
            if !ui.can_decrease_font_scale() {
                println!("Font size is already at the minimum");
                return Ok(());
            }
            ui.decrease_font_scale();
            println!("Font size: {} ({:.1}x)", ui.font_size_label(), ui.font_scale);
        }
        ConfigAction::Language { code } => {
            let code = code.trim().to_string();
            if code.is_empty() {
                return Err(report(AppError::Config(ConfigError::Invalid(
                    "language code must not be empty".to_string(),
                ))));
            }
            ui.set_language(code);
            println!("Language set to {}", ui.language);
        }
    }

    save_config(&config, path)
}

#[tokio::main]
async fn main() -> Result<()> {
    skycast_core::init()?;
    let args = Args::parse();
    let config_path = args.config.as_deref();

    let command = match args.command {
        Command::Config { action } => return configure(action, config_path),
        command => command,
    };

    let (config, _) = Config::load_validated(config_path).map_err(|e| report(config_load_error(e)))?;
    let services = build_services(&config).map_err(report)?;
    tracing::info!("SkyCast started");

    match command {
        Command::Track => track(services).await,
        Command::Refresh => refresh_once(services).await,
        Command::Search { name } => search(services, &name.join(" ")).await,
        Command::Config { .. } => Ok(()),
    }
}
