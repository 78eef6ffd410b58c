//! Playback of the adhan and the silent keep-alive sound.
//!
//! Every sound is decoded once during [`AudioManager::initialize`] and kept in
//! memory. Playback goes through an [`AudioOutput`], normally the
//! [`AudioEngineHandle`] thread that owns the rodio stream.

pub mod buffer;
pub mod engine;
pub mod keep_alive;

pub use buffer::DecodedSound;
pub use engine::{AudioEngineHandle, AudioOutput};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::debug_log::AppendOnlyLog;
use buffer::SILENCE_SAMPLE_RATE;
use keep_alive::{KeepAlive, KEEP_ALIVE_PERIOD};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

pub const SILENT_SOUND: &str = "silent";
pub const SILENT_VOLUME: f32 = 0.01;
pub const ADHAN_VOLUME: f32 = 1.0;
pub const DEFAULT_ADHAN_VARIANT: &str = "shia";
const SILENT_FALLBACK_LENGTH: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AudioInitError {
    #[error("failed to open audio output: {0}")]
    Output(String),

    #[error("unknown adhan variant '{variant}' (available: {})", .available.join(", "))]
    UnknownVariant {
        variant: String,
        available: Vec<String>,
    },

    #[error("failed to load sound '{name}' from {path}: {reason}")]
    Asset {
        name: String,
        path: PathBuf,
        reason: String,
    },
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Init(#[from] AudioInitError),

    #[error("Sound {0} not found in buffers")]
    MissingSound(String),

    #[error("audio output could not be resumed: {0}")]
    Resume(String),

    #[error("playback failed: {0}")]
    Output(String),
}

/// Shown when playback fails, with steps that usually fix it.
#[cfg(target_os = "ios")]
pub fn playback_remediation() -> &'static str {
    "To enable Adhan playback on iOS:\n1. Add this page to your home screen\n2. Open it from there\n3. Tap the test button once"
}

/// Shown when playback fails, with steps that usually fix it.
#[cfg(not(target_os = "ios"))]
pub fn playback_remediation() -> &'static str {
    "Unable to play Adhan. Please ensure audio playback is enabled on your device."
}

/// Sound files on disk, keyed by buffer name.
#[derive(Debug, Clone)]
pub struct SoundCatalog {
    pub silent: PathBuf,
    /// Variant name to file.
    pub adhans: BTreeMap<String, PathBuf>,
    pub variant: String,
}

impl SoundCatalog {
    pub fn in_dir(dir: &Path, variant: &str) -> Self {
        let mut adhans = BTreeMap::new();
        adhans.insert(
            DEFAULT_ADHAN_VARIANT.to_string(),
            dir.join("adhan_alhalawaji.mp3"),
        );

        Self {
            silent: dir.join("10-seconds-of-silence.mp3"),
            adhans,
            variant: variant.to_string(),
        }
    }

    pub fn adhan_sound_name(&self) -> String {
        adhan_sound_name(&self.variant)
    }

    fn entries(&self) -> Vec<(String, PathBuf)> {
        std::iter::once((SILENT_SOUND.to_string(), self.silent.clone()))
            .chain(
                self.adhans
                    .iter()
                    .map(|(variant, path)| (adhan_sound_name(variant), path.clone())),
            )
            .collect()
    }
}

fn adhan_sound_name(variant: &str) -> String {
    format!("adhan_{variant}")
}

/// Plays decoded buffers and waits for them to finish. Shared with the
/// keep-alive task.
pub(crate) struct SoundPlayer {
    output: Arc<dyn AudioOutput>,
    buffers: RwLock<HashMap<String, DecodedSound>>,
    debug_log: Arc<dyn AppendOnlyLog>,
}

impl SoundPlayer {
    pub(crate) fn debug_log(&self) -> &dyn AppendOnlyLog {
        self.debug_log.as_ref()
    }

    /// Resolves once the buffer's duration has elapsed.
    pub(crate) async fn play(&self, name: &str, volume: f32) -> Result<(), PlaybackError> {
        self.output.resume().await.map_err(|e| {
            self.debug_log
                .append_data("Audio context resume failed", json!({ "error": e }));
            PlaybackError::Resume(e)
        })?;

        let sound = self.buffers.read().await.get(name).cloned().ok_or_else(|| {
            self.debug_log
                .append(&format!("Sound {name} not found in buffers"));
            PlaybackError::MissingSound(name.to_string())
        })?;

        let duration = sound.duration();
        self.debug_log.append_data(
            &format!("Playing sound: {name}"),
            json!({ "durationSecs": duration.as_secs_f64(), "volume": volume }),
        );

        self.output.play(sound, volume).await.map_err(|e| {
            self.debug_log
                .append_data(&format!("Error playing sound {name}"), json!({ "error": e }));
            PlaybackError::Output(e)
        })?;

        tokio::time::sleep(duration).await;
        self.debug_log.append(&format!("Sound {name} finished playing"));
        Ok(())
    }
}

pub struct AudioManager {
    player: Arc<SoundPlayer>,
    catalog: SoundCatalog,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    keep_alive: Mutex<Option<KeepAlive>>,
    keep_alive_period: Duration,
}

impl AudioManager {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        catalog: SoundCatalog,
        debug_log: Arc<dyn AppendOnlyLog>,
    ) -> Self {
        Self {
            player: Arc::new(SoundPlayer {
                output,
                buffers: RwLock::new(HashMap::new()),
                debug_log,
            }),
            catalog,
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            keep_alive: Mutex::new(None),
            keep_alive_period: KEEP_ALIVE_PERIOD,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub async fn initialize(&self) -> Result<(), AudioInitError> {
        if self.is_initialized() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let debug_log = &self.player.debug_log;
        debug_log.append("Initializing audio");

        if !self.catalog.adhans.contains_key(&self.catalog.variant) {
            let err = AudioInitError::UnknownVariant {
                variant: self.catalog.variant.clone(),
                available: self.catalog.adhans.keys().cloned().collect(),
            };
            log_error!("{}", err);
            debug_log.append_data("Audio initialization failed", json!({ "error": err.to_string() }));
            return Err(err);
        }

        self.player.output.resume().await.map_err(|e| {
            log_error!("Audio output unavailable: {}", e);
            debug_log.append_data("Audio initialization failed", json!({ "error": e }));
            AudioInitError::Output(e)
        })?;

        let mut loaded = HashMap::new();
        for (name, path) in self.catalog.entries() {
            match load_sound(&name, &path).await {
                Ok(sound) => {
                    debug_log.append(&format!("Sound {name} loaded successfully"));
                    loaded.insert(name, sound);
                }
                Err(err) if name == SILENT_SOUND => {
                    log_warn!("{}; using generated silence", err);
                    debug_log.append_data(
                        "Silent sound failed to load, generating silence",
                        json!({ "error": err.to_string() }),
                    );
                    loaded.insert(
                        name,
                        DecodedSound::silence(SILENT_FALLBACK_LENGTH, SILENCE_SAMPLE_RATE),
                    );
                }
                Err(err) => {
                    log_error!("{}", err);
                    debug_log.append_data(
                        &format!("Error loading sound {name}"),
                        json!({ "error": err.to_string() }),
                    );
                    return Err(err);
                }
            }
        }

        *self.player.buffers.write().await = loaded;
        self.initialized.store(true, Ordering::SeqCst);
        debug_log.append("Audio initialized successfully");
        log_info!("Audio initialized");

        self.restart_keep_alive().await;
        Ok(())
    }

    pub async fn play_adhan(&self, manual: bool) -> Result<(), PlaybackError> {
        let name = self.catalog.adhan_sound_name();
        self.player.debug_log.append_data(
            "Playing adhan",
            json!({ "manual": manual, "sound": name }),
        );
        log_info!(
            "Playing adhan ({})",
            if manual { "manual test" } else { "scheduled" }
        );
        self.play_sound(&name).await
    }

    /// Plays a loaded buffer at its configured volume.
    pub async fn play_sound(&self, name: &str) -> Result<(), PlaybackError> {
        self.initialize().await?;
        let volume = if name == SILENT_SOUND {
            SILENT_VOLUME
        } else {
            ADHAN_VOLUME
        };
        self.player.play(name, volume).await
    }

    async fn restart_keep_alive(&self) {
        let mut slot = self.keep_alive.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop();
        }
        *slot = Some(KeepAlive::spawn(
            Arc::clone(&self.player),
            self.keep_alive_period,
        ));
    }

    pub async fn shutdown(&self) {
        if let Some(keep_alive) = self.keep_alive.lock().await.take() {
            keep_alive.stop();
        }
    }
}

async fn load_sound(name: &str, path: &Path) -> Result<DecodedSound, AudioInitError> {
    let asset_error = |reason: String| AudioInitError::Asset {
        name: name.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| asset_error(e.to_string()))?;
    if bytes.is_empty() {
        return Err(asset_error("file is empty".to_string()));
    }

    tokio::task::spawn_blocking(move || DecodedSound::decode(bytes))
        .await
        .map_err(|e| asset_error(e.to_string()))?
        .map_err(asset_error)
}


#[cfg(test)]
mod tests {
    use super::test_support::{sounds_dir, RecordingOutput};
    use super::*;
    use crate::debug_log::DebugLog;

    fn manager(output: Arc<RecordingOutput>, catalog: SoundCatalog) -> AudioManager {
        AudioManager::new(output, catalog, Arc::new(DebugLog::in_memory()))
    }

    #[tokio::test]
    async fn initialize_loads_every_declared_sound() {
        let (_dir, catalog) = sounds_dir();
        let audio = manager(Arc::new(RecordingOutput::default()), catalog);

        audio.initialize().await.unwrap();
        audio.initialize().await.unwrap();

        assert!(audio.is_initialized());
        let buffers = audio.player.buffers.read().await;
        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers["adhan_shia"].duration(), Duration::from_secs(1));
        assert_eq!(buffers[SILENT_SOUND].duration(), Duration::from_millis(500));
        drop(buffers);
        audio.shutdown().await;
    }

    #[tokio::test]
    async fn missing_silent_asset_falls_back_to_generated_silence() {
        let (_dir, catalog) = sounds_dir();
        std::fs::remove_file(&catalog.silent).unwrap();
        let audio = manager(Arc::new(RecordingOutput::default()), catalog);

        audio.initialize().await.unwrap();

        let buffers = audio.player.buffers.read().await;
        let silent = &buffers[SILENT_SOUND];
        assert_eq!(silent.duration(), Duration::from_secs(10));
        assert_eq!(silent.sample_rate(), 44100);
        drop(buffers);
        audio.shutdown().await;
    }

    #[tokio::test]
    async fn broken_adhan_asset_fails_initialization() {
        let (_dir, catalog) = sounds_dir();
        std::fs::write(catalog.adhans.get(DEFAULT_ADHAN_VARIANT).unwrap(), b"").unwrap();
        let audio = manager(Arc::new(RecordingOutput::default()), catalog);

        let err = audio.initialize().await.unwrap_err();
        assert!(matches!(err, AudioInitError::Asset { ref name, .. } if name == "adhan_shia"));
        assert!(!audio.is_initialized());
    }

    #[tokio::test]
    async fn undeclared_variant_fails_initialization() {
        let (_dir, mut catalog) = sounds_dir();
        catalog.variant = "sunni".to_string();
        let output = Arc::new(RecordingOutput::default());
        let audio = manager(Arc::clone(&output), catalog);

        let err = audio.initialize().await.unwrap_err();

        assert!(matches!(
            err,
            AudioInitError::UnknownVariant { ref variant, ref available }
                if variant == "sunni" && available == &vec!["shia".to_string()]
        ));
        assert!(!audio.is_initialized());
        assert!(output.volumes().is_empty());
    }

    #[tokio::test]
    async fn unavailable_output_fails_initialization() {
        let (_dir, catalog) = sounds_dir();
        let output = Arc::new(RecordingOutput::default());
        output.fail_resume.store(true, Ordering::SeqCst);
        let audio = manager(output, catalog);

        assert!(matches!(
            audio.initialize().await,
            Err(AudioInitError::Output(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn play_resolves_after_the_sound_duration() {
        let (_dir, catalog) = sounds_dir();
        let output = Arc::new(RecordingOutput::default());
        let audio = manager(Arc::clone(&output), catalog);
        audio.initialize().await.unwrap();

        let started = tokio::time::Instant::now();
        audio.play_adhan(true).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(output.volumes(), vec![ADHAN_VOLUME]);
        audio.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_sound_is_reported() {
        let (_dir, catalog) = sounds_dir();
        let audio = manager(Arc::new(RecordingOutput::default()), catalog);

        let err = audio.play_sound("chime").await.unwrap_err();
        assert!(matches!(err, PlaybackError::MissingSound(ref n) if n == "chime"));
        audio.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_plays_silence_quietly_every_period() {
        let (_dir, catalog) = sounds_dir();
        let output = Arc::new(RecordingOutput::default());
        let audio = manager(Arc::clone(&output), catalog);
        audio.initialize().await.unwrap();

        tokio::time::sleep(KEEP_ALIVE_PERIOD - Duration::from_secs(1)).await;
        assert!(output.volumes().is_empty());

        tokio::time::sleep(KEEP_ALIVE_PERIOD + Duration::from_secs(2)).await;
        assert_eq!(output.volumes(), vec![SILENT_VOLUME, SILENT_VOLUME]);

        audio.shutdown().await;
    }
}
