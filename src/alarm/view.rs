use std::sync::Mutex;

use chrono::{DateTime, Local};

use crate::prayer::{
    format::{format_long_date, format_time},
    Prayer, PrayerSchedule,
};

const NEXT_MARKER: &str = "▶";

/// Where the schedule is shown to the user.
pub trait ScheduleView: Send + Sync {
    fn render_schedule(&self, schedule: &PrayerSchedule, now: DateTime<Local>);

    /// Marks `prayer` as the next one. Only one prayer is marked at a time.
    fn highlight_next(&self, prayer: Prayer);

    fn alert(&self, message: &str);
}

/// Header line followed by one line per prayer.
pub fn render_lines(
    schedule: &PrayerSchedule,
    today: DateTime<Local>,
    next: Option<Prayer>,
) -> Vec<String> {
    let mut lines = Vec::with_capacity(Prayer::ALL.len() + 1);
    lines.push(format_long_date(&today));
    for (prayer, time) in schedule.iter() {
        let marker = if Some(prayer) == next { NEXT_MARKER } else { " " };
        lines.push(format!(
            "{marker} {:<8} {:>8}",
            prayer.to_string(),
            format_time(&time)
        ));
    }
    lines
}

#[derive(Default)]
struct Shown {
    schedule: Option<(PrayerSchedule, DateTime<Local>)>,
    next: Option<Prayer>,
}

/// Prints to the terminal. The table is reprinted only when the schedule or
/// the marked prayer changes.
#[derive(Default)]
pub struct TerminalView {
    shown: Mutex<Shown>,
}

impl TerminalView {
    pub fn new() -> Self {
        Self::default()
    }

    fn print(shown: &Shown) {
        if let Some((schedule, today)) = &shown.schedule {
            println!();
            for line in render_lines(schedule, *today, shown.next) {
                println!("{line}");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shown> {
        match self.shown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ScheduleView for TerminalView {
    fn render_schedule(&self, schedule: &PrayerSchedule, now: DateTime<Local>) {
        let mut shown = self.lock();
        shown.schedule = Some((schedule.clone(), now));
        Self::print(&shown);
    }

    fn highlight_next(&self, prayer: Prayer) {
        let mut shown = self.lock();
        if shown.next == Some(prayer) {
            return;
        }
        shown.next = Some(prayer);
        Self::print(&shown);
    }

    fn alert(&self, message: &str) {
        eprintln!("\n!! {message}");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Remembers every call instead of printing.
    #[derive(Default)]
    pub struct RecordingView {
        pub rendered: Mutex<Vec<PrayerSchedule>>,
        pub highlighted: Mutex<Vec<Prayer>>,
        pub alerts: Mutex<Vec<String>>,
    }

    impl ScheduleView for RecordingView {
        fn render_schedule(&self, schedule: &PrayerSchedule, _now: DateTime<Local>) {
            self.rendered.lock().unwrap().push(schedule.clone());
        }

        fn highlight_next(&self, prayer: Prayer) {
            self.highlighted.lock().unwrap().push(prayer);
        }

        fn alert(&self, message: &str) {
            self.alerts.lock().unwrap().push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prayer::test_support::{at, sample_date, sample_schedule};

    #[test]
    fn marks_only_the_next_prayer() {
        let lines = render_lines(
            &sample_schedule(),
            at(sample_date(), 17, 0, 0),
            Some(Prayer::Maghrib),
        );

        assert_eq!(lines[0], "Friday, March 15, 2024");
        assert_eq!(lines.len(), 6);
        assert!(lines[4].starts_with("▶ Maghrib"));
        assert!(lines[4].ends_with("6:00 PM"));
        assert_eq!(lines.iter().filter(|l| l.contains(NEXT_MARKER)).count(), 1);
        assert!(lines[1].starts_with("  Fajr"));
    }

    #[test]
    fn without_a_next_prayer_nothing_is_marked() {
        let lines = render_lines(&sample_schedule(), at(sample_date(), 9, 0, 0), None);
        assert!(!lines.iter().any(|l| l.contains(NEXT_MARKER)));
    }
}
