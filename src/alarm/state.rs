use std::collections::HashMap;

use chrono::{DateTime, Local};

use crate::prayer::{Prayer, PrayerSchedule};

/// How close to a prayer time the per-minute check must land.
pub const TRIGGER_WINDOW_MS: i64 = 30_000;
/// Minimum gap between two adhans for the same prayer.
pub const REPLAY_GUARD_MS: i64 = 60_000;

/// The prayer whose time is the nearest one after `now`. Once isha has
/// passed this is fajr.
pub fn next_prayer(schedule: &PrayerSchedule, now: DateTime<Local>) -> Prayer {
    schedule
        .iter()
        .filter(|(_, time)| *time > now)
        .min_by_key(|(_, time)| *time - now)
        .map(|(prayer, _)| prayer)
        .unwrap_or(Prayer::Fajr)
}

/// When each prayer's adhan last started. Lives for the process only.
#[derive(Debug, Default)]
pub struct LastPlayedRegistry {
    last_played: HashMap<Prayer, DateTime<Local>>,
}

impl LastPlayedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prayers that are due at `now` and have not played within the replay
    /// guard. Each returned prayer is recorded as played at `now`.
    pub fn check(&mut self, schedule: &PrayerSchedule, now: DateTime<Local>) -> Vec<Prayer> {
        let mut due = Vec::new();
        for (prayer, time) in schedule.iter() {
            let within_window = (now - time).num_milliseconds().abs() <= TRIGGER_WINDOW_MS;
            let guard_elapsed = self
                .last_played
                .get(&prayer)
                .map_or(true, |last| (now - *last).num_milliseconds() >= REPLAY_GUARD_MS);

            if within_window && guard_elapsed {
                self.last_played.insert(prayer, now);
                due.push(prayer);
            }
        }
        due
    }

    pub fn last_played(&self, prayer: Prayer) -> Option<DateTime<Local>> {
        self.last_played.get(&prayer).copied()
    }
}
