use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde_json::Value;

use super::DebugLogEntry;

const SEPARATOR_WIDTH: usize = 50;

/// Renders entries the way the console viewer prints them.
pub fn format_entries(entries: &[DebugLogEntry]) -> String {
    if entries.is_empty() {
        return "No logs available".to_string();
    }

    entries
        .iter()
        .map(format_entry)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_entry(entry: &DebugLogEntry) -> String {
    let time = DateTime::parse_from_rfc3339(&entry.timestamp)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| entry.timestamp.clone());

    let data = entry.data.as_deref().map(|raw| {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|value| serde_json::to_string_pretty(&value).ok())
            .unwrap_or_else(|| raw.to_string())
    });

    let mut out = format!("[{time}] {}\n", entry.message);
    if let Some(data) = data.filter(|d| !d.is_empty()) {
        out.push_str(&format!("Data: {data}\n"));
    }
    out.push_str(&"-".repeat(SEPARATOR_WIDTH));
    out
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    // ':' is not allowed in Windows file names.
    #[cfg(windows)]
    let stamp = stamp.replace(':', "-");
    format!("debug-logs-{stamp}.json")
}

/// Writes the entries as pretty JSON into `dir` and returns the file path.
pub fn export_entries(entries: &[DebugLogEntry], dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;

    let path = dir.join(export_file_name(now));
    let serialized = serde_json::to_string_pretty(entries)?;
    std::fs::write(&path, serialized)
        .with_context(|| format!("failed to write debug logs to {}", path.display()))?;
    Ok(path)
}
