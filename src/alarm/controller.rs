use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use serde_json::json;
use thiserror::Error;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    audio::{playback_remediation, AudioManager},
    debug_log::AppendOnlyLog,
    location::{LocationError, LocationProvider},
    prayer::{PrayerSchedule, PrayerTimesClient, ScheduleError},
};

use super::{next_prayer, LastPlayedRegistry, ScheduleView};

const ENABLE_LOGS: bool = true;
use crate::{log_debug, log_error, log_info};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// What the user is told when a refresh fails.
pub fn alert_message(err: &RefreshError) -> String {
    let detail = match err {
        RefreshError::Schedule(ScheduleError::ParseFailure(_)) => {
            "Error processing prayer times data. Please restart.".to_string()
        }
        RefreshError::Schedule(ScheduleError::HttpStatus(_)) => {
            "The prayer times service is currently unavailable. Please try again later."
                .to_string()
        }
        RefreshError::Location(location) => location.user_message().to_string(),
        other => format!("Error: {other}"),
    };
    format!("Unable to calculate prayer times. {detail}")
}

/// Keeps today's schedule current and plays the adhan when a prayer is due.
#[derive(Clone)]
pub struct AlarmController {
    location: LocationProvider,
    client: Arc<PrayerTimesClient>,
    audio: Arc<AudioManager>,
    view: Arc<dyn ScheduleView>,
    debug_log: Arc<dyn AppendOnlyLog>,
    schedule: Arc<RwLock<Option<PrayerSchedule>>>,
    registry: Arc<Mutex<LastPlayedRegistry>>,
    refresher: Arc<Mutex<Option<JoinHandle<()>>>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    refresh_interval: Duration,
    tick_interval: Duration,
}

impl AlarmController {
    pub fn new(
        location: LocationProvider,
        client: Arc<PrayerTimesClient>,
        audio: Arc<AudioManager>,
        view: Arc<dyn ScheduleView>,
        debug_log: Arc<dyn AppendOnlyLog>,
    ) -> Self {
        Self {
            location,
            client,
            audio,
            view,
            debug_log,
            schedule: Arc::new(RwLock::new(None)),
            registry: Arc::new(Mutex::new(LastPlayedRegistry::new())),
            refresher: Arc::new(Mutex::new(None)),
            ticker: Arc::new(Mutex::new(None)),
            refresh_interval: REFRESH_INTERVAL,
            tick_interval: TICK_INTERVAL,
        }
    }

    #[cfg(test)]
    fn with_intervals(mut self, refresh: Duration, tick: Duration) -> Self {
        self.refresh_interval = refresh;
        self.tick_interval = tick;
        self
    }

    pub async fn schedule(&self) -> Option<PrayerSchedule> {
        self.schedule.read().await.clone()
    }

    /// Fetches today's schedule, then starts the hourly refresh and the
    /// per-minute check.
    pub async fn start(&self) {
        let _ = self.refresh().await;
        self.spawn_refresher().await;
        self.spawn_ticker().await;
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.refresher.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
        self.audio.shutdown().await;
        log_info!("Alarm controller stopped");
    }

    pub async fn refresh(&self) -> Result<(), RefreshError> {
        self.refresh_at(Local::now()).await
    }

    /// On failure the user is alerted and the current schedule stays as it was.
    pub async fn refresh_at(&self, now: DateTime<Local>) -> Result<(), RefreshError> {
        let schedule = match self.load_schedule(now).await {
            Ok(schedule) => schedule,
            Err(err) => {
                log_error!("Error calculating prayer times: {}", err);
                self.debug_log.append_data(
                    "Error calculating prayer times",
                    json!({ "error": err.to_string() }),
                );
                self.view.alert(&alert_message(&err));
                return Err(err);
            }
        };

        log_info!("Prayer times updated for {}", schedule.date());
        *self.schedule.write().await = Some(schedule.clone());
        self.view.render_schedule(&schedule, now);

        self.check_and_play(now).await;
        self.update_next_prayer(now).await;
        Ok(())
    }

    async fn load_schedule(&self, now: DateTime<Local>) -> Result<PrayerSchedule, RefreshError> {
        let coord = self.location.resolve().await?;
        let schedule = self.client.fetch(&coord, now.date_naive()).await?;
        Ok(schedule)
    }

    pub async fn tick(&self) {
        self.tick_at(Local::now()).await;
    }

    /// Per-minute work. A schedule from another day is replaced first.
    pub async fn tick_at(&self, now: DateTime<Local>) {
        let stale_date = self
            .schedule
            .read()
            .await
            .as_ref()
            .map(|s| s.date())
            .filter(|date| *date != now.date_naive());

        if let Some(date) = stale_date {
            log_info!("Schedule for {} is out of date; refreshing", date);
            let _ = self.refresh_at(now).await;
            return;
        }

        self.update_next_prayer(now).await;
        self.check_and_play(now).await;
    }

    async fn update_next_prayer(&self, now: DateTime<Local>) {
        if let Some(schedule) = self.schedule.read().await.as_ref() {
            self.view.highlight_next(next_prayer(schedule, now));
        }
    }

    async fn check_and_play(&self, now: DateTime<Local>) {
        let due = {
            let schedule = self.schedule.read().await;
            let Some(schedule) = schedule.as_ref() else {
                return;
            };
            self.registry.lock().await.check(schedule, now)
        };

        for prayer in due {
            log_info!("Time for {}", prayer);
            self.debug_log
                .append_data("Playing adhan for prayer", json!({ "prayer": prayer.as_str() }));

            let audio = Arc::clone(&self.audio);
            let view = Arc::clone(&self.view);
            let debug_log = Arc::clone(&self.debug_log);
            tokio::spawn(async move {
                if let Err(err) = audio.play_adhan(false).await {
                    log_error!("Adhan for {} failed: {}", prayer, err);
                    debug_log.append_data(
                        "Error playing adhan",
                        json!({ "prayer": prayer.as_str(), "error": err.to_string() }),
                    );
                    view.alert(playback_remediation());
                }
            });
        }
    }

    async fn spawn_refresher(&self) {
        let mut guard = self.refresher.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let period = self.refresh_interval;
        *guard = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                log_debug!("Hourly refresh");
                let _ = controller.refresh().await;
            }
        }));
    }

    async fn spawn_ticker(&self) {
        let mut guard = self.ticker.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let period = self.tick_interval;
        *guard = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                log_debug!("Checking prayer times");
                controller.tick().await;
            }
        }));
    }
}
