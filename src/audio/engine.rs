use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::{
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;
use tokio::sync::oneshot;

use super::buffer::DecodedSound;

/// Where decoded sounds end up. The real implementation is the rodio engine;
/// tests substitute a recorder.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Opens the output if it is not open yet.
    async fn resume(&self) -> Result<(), String>;

    /// Starts playing `sound` and returns as soon as it is queued.
    async fn play(&self, sound: DecodedSound, volume: f32) -> Result<(), String>;
}

enum AudioCommand {
    Resume {
        reply: oneshot::Sender<Result<(), String>>,
    },
    Play {
        sound: DecodedSound,
        volume: f32,
        reply: oneshot::Sender<Result<(), String>>,
    },
}

/// Owns the process's only audio output. The rodio stream is not `Send`, so
/// it lives on a dedicated thread that is spawned once and fed commands.
pub struct AudioEngineHandle {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
}

impl AudioEngineHandle {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, String> {
        let mut guard = self.tx.lock().map_err(|e| e.to_string())?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                let mut stream: Option<(OutputStream, OutputStreamHandle)> = None;

                fn ensure_stream(
                    stream: &mut Option<(OutputStream, OutputStreamHandle)>,
                ) -> Result<&OutputStreamHandle, String> {
                    if stream.is_none() {
                        let opened = OutputStream::try_default()
                            .map_err(|e| format!("Failed to create audio output stream: {}", e))?;
                        log::info!("Audio output stream opened");
                        *stream = Some(opened);
                    }
                    stream
                        .as_ref()
                        .map(|(_, handle)| handle)
                        .ok_or_else(|| "audio output stream missing".to_string())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Resume { reply } => {
                            let result = ensure_stream(&mut stream).map(|_| ());
                            let _ = reply.send(result);
                        }
                        AudioCommand::Play {
                            sound,
                            volume,
                            reply,
                        } => {
                            let result = ensure_stream(&mut stream).and_then(|handle| {
                                let sink = Sink::try_new(handle)
                                    .map_err(|e| format!("Failed to create audio sink: {}", e))?;
                                sink.set_volume(volume.clamp(0.0, 1.0));
                                sink.append(sound.source());
                                // The sink keeps playing after the handle is gone.
                                sink.detach();
                                Ok(())
                            });
                            if result.is_err() {
                                // Drop a broken stream so the next command reopens it.
                                stream = None;
                            }
                            let _ = reply.send(result);
                        }
                    }
                }
            })
            .map_err(|e| e.to_string())?;

        *guard = Some(tx.clone());
        Ok(tx)
    }

    async fn send(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), String>>) -> AudioCommand,
    ) -> Result<(), String> {
        let tx = self.ensure_thread()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(build(reply_tx)).map_err(|e| e.to_string())?;
        reply_rx
            .await
            .map_err(|_| "audio engine thread stopped".to_string())?
    }
}

#[async_trait]
impl AudioOutput for AudioEngineHandle {
    async fn resume(&self) -> Result<(), String> {
        self.send(|reply| AudioCommand::Resume { reply }).await
    }

    async fn play(&self, sound: DecodedSound, volume: f32) -> Result<(), String> {
        self.send(|reply| AudioCommand::Play {
            sound,
            volume,
            reply,
        })
        .await
    }
}
