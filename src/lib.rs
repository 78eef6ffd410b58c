pub mod alarm;
pub mod audio;
pub mod console;
pub mod db;
pub mod debug_log;
pub mod location;
pub mod prayer;
pub mod settings;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use serde_json::json;

use alarm::{AlarmController, ScheduleView, TerminalView};
use audio::{AudioEngineHandle, AudioManager, SoundCatalog};
use console::{Console, APP_VERSION};
use db::Database;
use debug_log::{AppendOnlyLog, DebugLog};
use location::{
    DisabledPositionSource, FixedPositionSource, IpPositionSource, LocationProvider,
    PositionOptions, PositionSource, SqliteCoordinateCache,
};
use prayer::PrayerTimesClient;
use settings::{Cli, LocationMode, SettingsStore, UserSettings};

fn debug_mode() -> bool {
    std::env::var("ADHAN_ALARM_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode() {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    log::info!("Adhan Alarm {} starting up...", APP_VERSION);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(start(cli))
}

async fn start(cli: Cli) -> Result<()> {
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(settings::default_data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::new(data_dir.join("settings.json"))?;
    let settings = settings_store.current().with_cli(&cli);

    let database = Database::new(data_dir.join("adhan-alarm.sqlite3"))?;
    let debug_log: Arc<dyn AppendOnlyLog> = Arc::new(
        DebugLog::open(database.clone(), settings.clear_debug_log_on_start).await?,
    );
    debug_log.append_data(
        "Application started",
        json!({ "version": APP_VERSION, "dataDir": data_dir.display().to_string() }),
    );

    let location = LocationProvider::new(
        position_source(&settings)?,
        Arc::new(SqliteCoordinateCache::new(database.clone())),
        Arc::clone(&debug_log),
    )
    .with_options(PositionOptions {
        timeout: settings.location_timeout(),
        ..PositionOptions::default()
    });

    let client = PrayerTimesClient::new(
        &settings.api_base_url,
        settings.method,
        settings.school,
        Arc::clone(&debug_log),
    )?;

    let audio = Arc::new(AudioManager::new(
        Arc::new(AudioEngineHandle::new()),
        SoundCatalog::in_dir(&settings.sounds_dir_in(&data_dir), &settings.adhan_variant),
        Arc::clone(&debug_log),
    ));

    let view: Arc<dyn ScheduleView> = Arc::new(TerminalView::new());
    let controller = AlarmController::new(
        location,
        Arc::new(client),
        Arc::clone(&audio),
        Arc::clone(&view),
        Arc::clone(&debug_log),
    );

    controller.start().await;

    let console = Console::new(
        controller.clone(),
        audio,
        view,
        debug_log,
        settings.export_dir_in(&data_dir),
    );
    console.run().await;

    controller.shutdown().await;
    log::info!("Adhan Alarm stopped");
    Ok(())
}

fn position_source(settings: &UserSettings) -> Result<Option<Arc<dyn PositionSource>>> {
    let source: Arc<dyn PositionSource> = match settings.location_mode {
        LocationMode::Fixed => match (settings.latitude, settings.longitude) {
            (Some(latitude), Some(longitude)) => {
                Arc::new(FixedPositionSource::new(latitude, longitude))
            }
            _ => {
                warn!("Fixed location mode needs both latitude and longitude");
                return Ok(None);
            }
        },
        LocationMode::Ip => Arc::new(IpPositionSource::new(&settings.ip_lookup_url)?),
        LocationMode::Disabled => Arc::new(DisabledPositionSource),
    };
    Ok(Some(source))
}
