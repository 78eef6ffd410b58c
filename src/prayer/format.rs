use chrono::{DateTime, Local};

/// `5:04 AM` style, as shown next to each prayer.
pub fn format_time(time: &DateTime<Local>) -> String {
    time.format("%-I:%M %p").to_string()
}

/// `Friday, March 15, 2024`
pub fn format_long_date(time: &DateTime<Local>) -> String {
    time.format("%A, %B %-d, %Y").to_string()
}
