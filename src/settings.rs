use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::audio::DEFAULT_ADHAN_VARIANT;
use crate::location::source::DEFAULT_IP_LOOKUP_URL;
use crate::prayer::client::DEFAULT_API_BASE_URL;

const APP_DIR_NAME: &str = "adhan-alarm";

#[derive(Parser, Debug, Default)]
#[command(name = "adhan-alarm", version)]
#[command(about = "Shows today's prayer times and plays the adhan when each one arrives", long_about = None)]
pub struct Cli {
    /// Directory holding settings.json and the database
    #[arg(long, env = "ADHAN_ALARM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Use this latitude instead of looking the position up
    #[arg(long, requires = "longitude", allow_negative_numbers = true)]
    pub latitude: Option<f64>,

    #[arg(long, requires = "latitude", allow_negative_numbers = true)]
    pub longitude: Option<f64>,

    /// Never request a position; only a cached one is used
    #[arg(long, conflicts_with = "latitude")]
    pub no_location: bool,

    /// Base URL of the prayer times API
    #[arg(long, env = "ADHAN_ALARM_API_URL")]
    pub api_url: Option<String>,

    /// Directory with the silent and adhan sound files
    #[arg(long, env = "ADHAN_ALARM_SOUNDS_DIR")]
    pub sounds_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationMode {
    /// `latitude`/`longitude` from settings.
    Fixed,
    /// Approximate position from the public IP address.
    #[default]
    Ip,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub location_mode: LocationMode,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub ip_lookup_url: String,
    pub location_timeout_secs: u64,
    pub api_base_url: String,
    /// Calculation method id understood by the API.
    pub method: u8,
    /// Asr juristic school, 0 = Shafi, 1 = Hanafi.
    pub school: u8,
    pub sounds_dir: Option<PathBuf>,
    pub adhan_variant: String,
    pub export_dir: Option<PathBuf>,
    pub clear_debug_log_on_start: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            location_mode: LocationMode::default(),
            latitude: None,
            longitude: None,
            ip_lookup_url: DEFAULT_IP_LOOKUP_URL.to_string(),
            location_timeout_secs: 30,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            method: 0,
            school: 0,
            sounds_dir: None,
            adhan_variant: DEFAULT_ADHAN_VARIANT.to_string(),
            export_dir: None,
            clear_debug_log_on_start: true,
        }
    }
}

impl UserSettings {
    /// Command line flags win over the file. Nothing here is persisted.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let (Some(latitude), Some(longitude)) = (cli.latitude, cli.longitude) {
            self.location_mode = LocationMode::Fixed;
            self.latitude = Some(latitude);
            self.longitude = Some(longitude);
        }
        if cli.no_location {
            self.location_mode = LocationMode::Disabled;
        }
        if let Some(url) = &cli.api_url {
            self.api_base_url = url.clone();
        }
        if let Some(dir) = &cli.sounds_dir {
            self.sounds_dir = Some(dir.clone());
        }
        self
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs.max(1))
    }

    pub fn sounds_dir_in(&self, data_dir: &Path) -> PathBuf {
        self.sounds_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("sounds"))
    }

    pub fn export_dir_in(&self, data_dir: &Path) -> PathBuf {
        self.export_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| data_dir.to_path_buf())
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{APP_DIR_NAME}")))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    /// Loads `path`, writing the defaults there if it does not exist yet. An
    /// unreadable file falls back to defaults and is left alone.
    pub fn new(path: PathBuf) -> Result<Self> {
        let exists = path.exists();
        let data = if exists {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring invalid settings in {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        let store = Self {
            path,
            data: RwLock::new(data),
        };
        if !exists {
            store.persist(&store.read())?;
        }
        Ok(store)
    }

    pub fn current(&self) -> UserSettings {
        self.read().clone()
    }

    #[allow(dead_code)]
    pub fn update(&self, change: impl FnOnce(&mut UserSettings)) -> Result<()> {
        let mut guard = self.write();
        change(&mut guard);
        self.persist(&guard)
    }

    #[allow(dead_code)]
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
