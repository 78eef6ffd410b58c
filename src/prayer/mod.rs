pub mod client;
pub mod format;

pub use client::{format_date_for_api, parse_api_date, PrayerTimesClient, ScheduleError};

use std::fmt;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prayer {
    Fajr,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl Prayer {
    /// Canonical order through the day.
    pub const ALL: [Prayer; 5] = [
        Prayer::Fajr,
        Prayer::Dhuhr,
        Prayer::Asr,
        Prayer::Maghrib,
        Prayer::Isha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Prayer::Fajr => "fajr",
            Prayer::Dhuhr => "dhuhr",
            Prayer::Asr => "asr",
            Prayer::Maghrib => "maghrib",
            Prayer::Isha => "isha",
        }
    }

    /// Field name in the timings API response.
    pub fn api_field(&self) -> &'static str {
        match self {
            Prayer::Fajr => "Fajr",
            Prayer::Dhuhr => "Dhuhr",
            Prayer::Asr => "Asr",
            Prayer::Maghrib => "Maghrib",
            Prayer::Isha => "Isha",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Prayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_field())
    }
}

/// The five prayer times of one day, in the local zone.
///
/// A schedule always holds exactly one time per prayer; there is no way to
/// build a partial one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrayerSchedule {
    date: NaiveDate,
    times: [DateTime<Local>; 5],
}

impl PrayerSchedule {
    pub fn new(date: NaiveDate, times: [DateTime<Local>; 5]) -> Self {
        Self { date, times }
    }

    /// Builds a schedule from `(prayer, time)` pairs in any order. Fails unless
    /// every prayer appears exactly once.
    pub fn from_entries(
        date: NaiveDate,
        entries: impl IntoIterator<Item = (Prayer, DateTime<Local>)>,
    ) -> Result<Self> {
        let mut slots: [Option<DateTime<Local>>; 5] = [None; 5];
        for (prayer, time) in entries {
            let slot = &mut slots[prayer.index()];
            if slot.is_some() {
                return Err(anyhow!("duplicate time for {prayer}"));
            }
            *slot = Some(time);
        }

        let [Some(fajr), Some(dhuhr), Some(asr), Some(maghrib), Some(isha)] = slots else {
            let missing: Vec<&str> = Prayer::ALL
                .iter()
                .filter(|p| slots[p.index()].is_none())
                .map(|p| p.as_str())
                .collect();
            return Err(anyhow!("schedule is missing {}", missing.join(", ")));
        };

        Ok(Self {
            date,
            times: [fajr, dhuhr, asr, maghrib, isha],
        })
    }

    /// The date the API reported for these times.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn time_of(&self, prayer: Prayer) -> DateTime<Local> {
        self.times[prayer.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Prayer, DateTime<Local>)> + '_ {
        Prayer::ALL.into_iter().map(|p| (p, self.time_of(p)))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    pub fn at(date: NaiveDate, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(&date.and_hms_opt(hour, minute, second).unwrap())
            .earliest()
            .unwrap()
    }

    pub fn sample_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    /// fajr 06:00, dhuhr 12:00, asr 15:30, maghrib 18:00, isha 19:30
    pub fn sample_schedule() -> PrayerSchedule {
        let d = sample_date();
        PrayerSchedule::new(
            d,
            [
                at(d, 6, 0, 0),
                at(d, 12, 0, 0),
                at(d, 15, 30, 0),
                at(d, 18, 0, 0),
                at(d, 19, 30, 0),
            ],
        )
    }
}
