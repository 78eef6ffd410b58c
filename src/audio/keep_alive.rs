use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{SoundPlayer, SILENT_SOUND, SILENT_VOLUME};

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(120);

/// Periodically plays the silent buffer so the output device is not
/// suspended between prayers.
pub struct KeepAlive {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl KeepAlive {
    pub(super) fn spawn(player: Arc<SoundPlayer>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = player.play(SILENT_SOUND, SILENT_VOLUME).await {
                            log_warn!("Keep-alive playback failed: {}", err);
                            player.debug_log().append(&format!("Keep-alive failed: {err}"));
                        }
                    }
                }
            }

            log_info!("Keep-alive stopped");
        });

        log_info!("Keep-alive started ({}s period)", period.as_secs());
        Self { cancel, handle }
    }

    pub fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}
