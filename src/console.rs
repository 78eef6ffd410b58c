//! Line commands read from stdin while the alarm runs.

use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::Mutex,
};

use crate::{
    alarm::{AlarmController, ScheduleView},
    audio::{playback_remediation, AudioManager},
    debug_log::{export_entries, format_entries, AppendOnlyLog},
};

const ENABLE_LOGS: bool = true;
use crate::{log_error, log_info, log_warn};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const HELP: &str = "\
Commands:
  i, init       initialize audio
  t, test       play the adhan now
  d, logs       show debug logs
  clear         clear debug logs
  download      save debug logs to a file
  r, refresh    fetch prayer times again
  v, version    show version
  q, quit       exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    InitAudio,
    TestAdhan,
    ShowLogs,
    ClearLogs,
    DownloadLogs,
    Refresh,
    Version,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.trim();
        let command = match word {
            "" => return None,
            "i" | "init" => Command::InitAudio,
            "t" | "test" => Command::TestAdhan,
            "d" | "D" | "logs" => Command::ShowLogs,
            "clear" => Command::ClearLogs,
            "download" => Command::DownloadLogs,
            "r" | "refresh" => Command::Refresh,
            "v" | "version" => Command::Version,
            "h" | "help" | "?" => Command::Help,
            "q" | "quit" | "exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        };
        Some(command)
    }
}

/// Audio initialization progress as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioButtonState {
    Idle,
    Initializing,
    Ready,
    Error,
}

impl AudioButtonState {
    pub fn label(&self) -> &'static str {
        match self {
            AudioButtonState::Idle => "Initialize Audio",
            AudioButtonState::Initializing => "Initializing...",
            AudioButtonState::Ready => "Audio Ready",
            AudioButtonState::Error => "Retry Initialize",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue(String),
    Quit,
}

pub struct Console {
    controller: AlarmController,
    audio: Arc<AudioManager>,
    view: Arc<dyn ScheduleView>,
    debug_log: Arc<dyn AppendOnlyLog>,
    export_dir: PathBuf,
    audio_state: Mutex<AudioButtonState>,
}

impl Console {
    pub fn new(
        controller: AlarmController,
        audio: Arc<AudioManager>,
        view: Arc<dyn ScheduleView>,
        debug_log: Arc<dyn AppendOnlyLog>,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            controller,
            audio,
            view,
            debug_log,
            export_dir,
            audio_state: Mutex::new(AudioButtonState::Idle),
        }
    }

    pub async fn audio_state(&self) -> AudioButtonState {
        *self.audio_state.lock().await
    }

    /// Reads commands until `quit` or Ctrl-C. A closed stdin only stops the
    /// command reader; the alarm keeps running until Ctrl-C.
    pub async fn run(&self) {
        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        let Some(command) = Command::parse(&line) else {
                            continue;
                        };
                        match self.handle(command).await {
                            Step::Continue(reply) => println!("{reply}"),
                            Step::Quit => break,
                        }
                    }
                    Ok(None) => {
                        log_info!("stdin closed; press Ctrl-C to exit");
                        stdin_open = false;
                    }
                    Err(err) => {
                        log_warn!("Failed to read command: {}", err);
                        stdin_open = false;
                    }
                },
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        log_error!("Failed to listen for Ctrl-C: {}", err);
                    }
                    break;
                }
            }
        }
    }

    pub async fn handle(&self, command: Command) -> Step {
        let reply = match command {
            Command::InitAudio => self.init_audio().await,
            Command::TestAdhan => self.test_adhan().await,
            Command::ShowLogs => format_entries(&self.debug_log.entries()),
            Command::ClearLogs => {
                self.debug_log.clear();
                "Debug logs cleared".to_string()
            }
            Command::DownloadLogs => {
                match export_entries(&self.debug_log.entries(), &self.export_dir, Utc::now()) {
                    Ok(path) => format!("Debug logs saved to {}", path.display()),
                    Err(err) => {
                        log_error!("Failed to export debug logs: {:#}", err);
                        format!("Failed to save debug logs: {err:#}")
                    }
                }
            }
            Command::Refresh => match self.controller.refresh().await {
                Ok(()) => "Prayer times updated".to_string(),
                Err(_) => "Prayer times could not be updated".to_string(),
            },
            Command::Version => format!("Version {APP_VERSION}"),
            Command::Help => HELP.to_string(),
            Command::Quit => return Step::Quit,
            Command::Unknown(word) => format!("Unknown command '{word}'. Type 'help'."),
        };
        Step::Continue(reply)
    }

    async fn init_audio(&self) -> String {
        {
            let mut state = self.audio_state.lock().await;
            match *state {
                AudioButtonState::Initializing => return state.label().to_string(),
                AudioButtonState::Ready => return state.label().to_string(),
                AudioButtonState::Idle | AudioButtonState::Error => {
                    *state = AudioButtonState::Initializing;
                }
            }
        }
        println!("{}", AudioButtonState::Initializing.label());

        let (next, reply) = match self.audio.initialize().await {
            Ok(()) => (
                AudioButtonState::Ready,
                AudioButtonState::Ready.label().to_string(),
            ),
            Err(err) => {
                self.view.alert(&format!("Error initializing audio: {err}"));
                (
                    AudioButtonState::Error,
                    AudioButtonState::Error.label().to_string(),
                )
            }
        };
        *self.audio_state.lock().await = next;
        reply
    }

    /// Playback runs in the background so commands stay responsive.
    async fn test_adhan(&self) -> String {
        // Scheduled playback can initialize the manager without the 'i' command.
        if !self.audio.is_initialized() {
            return "Audio is not initialized yet. Type 'i' first.".to_string();
        }
        *self.audio_state.lock().await = AudioButtonState::Ready;

        let audio = Arc::clone(&self.audio);
        let view = Arc::clone(&self.view);
        let debug_log = Arc::clone(&self.debug_log);
        tokio::spawn(async move {
            if let Err(err) = audio.play_adhan(true).await {
                log_error!("Test adhan failed: {}", err);
                debug_log.append(&format!("Test adhan failed: {err}"));
                view.alert(playback_remediation());
            }
        });
        "Playing test adhan".to_string()
    }
}
