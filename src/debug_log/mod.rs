//! Rolling debug log kept in the key/value store.
//!
//! Entries are newest-first and bounded both by count and by the size of the
//! serialized array. Every entry is mirrored to the `log` facade so the
//! terminal shows it when `RUST_LOG=debug`.

mod viewer;

pub use viewer::{export_entries, export_file_name, format_entries};

use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Database;

pub const DEBUG_LOGS_KEY: &str = "debugLogs";
pub const MAX_ENTRIES: usize = 100;
pub const MAX_SERIALIZED_CHARS: usize = 4_000_000;
const USER_AGENT_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugLogEntry {
    /// RFC 3339, UTC, millisecond precision.
    pub timestamp: String,
    pub message: String,
    /// Payload serialized as a JSON string.
    pub data: Option<String>,
    pub user_agent: String,
    pub url: String,
}

impl DebugLogEntry {
    pub fn new(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            message: message.into(),
            data: data.map(|value| value.to_string()),
            user_agent: user_agent().to_string(),
            url: program_path().to_string(),
        }
    }
}

/// Append-only sink for diagnostic entries.
///
/// Implementations never fail the caller: a broken sink loses entries, it
/// does not break the feature that was logging.
pub trait AppendOnlyLog: Send + Sync {
    fn push(&self, entry: DebugLogEntry);

    /// Newest first.
    fn entries(&self) -> Vec<DebugLogEntry>;

    fn clear(&self);

    fn append(&self, message: &str) {
        self.push(DebugLogEntry::new(message, None));
    }

    fn append_data(&self, message: &str, data: Value) {
        self.push(DebugLogEntry::new(message, Some(data)));
    }
}

pub struct DebugLog {
    entries: Mutex<Vec<DebugLogEntry>>,
    store: Option<Database>,
}

impl DebugLog {
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            store: None,
        }
    }

    /// Opens the log stored under [`DEBUG_LOGS_KEY`]. With `clear_on_start`
    /// the previous run's entries are discarded.
    pub async fn open(db: Database, clear_on_start: bool) -> Result<Self> {
        let mut entries = Vec::new();

        if clear_on_start {
            db.remove_value(DEBUG_LOGS_KEY)
                .await
                .context("failed to clear debug logs")?;
        } else if let Some(raw) = db.get_value(DEBUG_LOGS_KEY).await? {
            match serde_json::from_str::<Vec<DebugLogEntry>>(&raw) {
                Ok(stored) => entries = stored,
                Err(err) => {
                    error!("Discarding unreadable debug logs: {err}");
                    db.remove_value(DEBUG_LOGS_KEY).await?;
                }
            }
        }

        enforce_bounds(&mut entries);

        Ok(Self {
            entries: Mutex::new(entries),
            store: Some(db),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DebugLogEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, entries: &[DebugLogEntry]) {
        let Some(db) = &self.store else {
            return;
        };

        let result = serde_json::to_string(entries)
            .map_err(anyhow::Error::from)
            .and_then(|serialized| db.put_value_detached(DEBUG_LOGS_KEY, serialized));
        if let Err(err) = result {
            error!("Error saving debug log: {err:?}");
        }
    }
}

impl AppendOnlyLog for DebugLog {
    fn push(&self, entry: DebugLogEntry) {
        match &entry.data {
            Some(data) => debug!("{} {}", entry.message, data),
            None => debug!("{}", entry.message),
        }

        let mut entries = self.lock();
        entries.insert(0, entry);
        enforce_bounds(&mut entries);
        self.persist(&entries);
    }

    fn entries(&self) -> Vec<DebugLogEntry> {
        self.lock().clone()
    }

    fn clear(&self) {
        self.lock().clear();
        if let Some(db) = &self.store {
            if let Err(err) = db.remove_value_detached(DEBUG_LOGS_KEY) {
                error!("Error clearing debug log: {err:?}");
            }
        }
    }
}

/// Drops the oldest entries until both caps hold.
fn enforce_bounds(entries: &mut Vec<DebugLogEntry>) {
    let mut sizes: Vec<usize> = entries.iter().map(serialized_chars).collect();
    let mut total = array_chars(&sizes);

    while entries.len() > MAX_ENTRIES || total > MAX_SERIALIZED_CHARS {
        entries.pop();
        sizes.pop();
        total = array_chars(&sizes);
    }
}

fn serialized_chars(entry: &DebugLogEntry) -> usize {
    serde_json::to_string(entry)
        .map(|s| s.chars().count())
        .unwrap_or(0)
}

// `[a,b,c]`: brackets plus one comma between neighbours.
fn array_chars(sizes: &[usize]) -> usize {
    let commas = sizes.len().saturating_sub(1);
    2 + commas + sizes.iter().sum::<usize>()
}

fn user_agent() -> &'static str {
    static USER_AGENT: OnceLock<String> = OnceLock::new();
    USER_AGENT.get_or_init(|| {
        let full = format!(
            "{}/{} ({}; {})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        full.chars().take(USER_AGENT_MAX_CHARS).collect()
    })
}

fn program_path() -> &'static str {
    static PROGRAM: OnceLock<String> = OnceLock::new();
    PROGRAM.get_or_init(|| std::env::args().next().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_the_hundred_newest_entries() {
        let log = DebugLog::in_memory();
        for i in 0..150 {
            log.append(&format!("entry {i}"));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries.first().unwrap().message, "entry 149");
        assert_eq!(entries.last().unwrap().message, "entry 50");
    }

    #[test]
    fn evicts_oldest_when_serialized_size_exceeds_cap() {
        let log = DebugLog::in_memory();
        let payload = "x".repeat(1_500_000);
        for i in 0..3 {
            log.append_data(&format!("big {i}"), json!(payload));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "big 2");
        assert_eq!(entries[1].message, "big 1");
        assert!(serde_json::to_string(&entries).unwrap().len() <= MAX_SERIALIZED_CHARS);
    }

    #[test]
    fn entry_carries_serialized_data_and_short_user_agent() {
        let entry = DebugLogEntry::new("Location resolved", Some(json!({"latitude": 21.4})));
        assert_eq!(entry.data.as_deref(), Some(r#"{"latitude":21.4}"#));
        assert!(entry.user_agent.chars().count() <= USER_AGENT_MAX_CHARS);
        assert!(entry.timestamp.ends_with('Z'));

        let serialized = serde_json::to_value(&entry).unwrap();
        assert!(serialized.get("userAgent").is_some());
        assert!(serialized.get("url").is_some());
    }

    #[test]
    fn array_size_matches_serde() {
        let entries = vec![
            DebugLogEntry::new("a", None),
            DebugLogEntry::new("b", Some(json!([1, 2]))),
        ];
        let sizes: Vec<usize> = entries.iter().map(serialized_chars).collect();
        assert_eq!(
            array_chars(&sizes),
            serde_json::to_string(&entries).unwrap().chars().count()
        );
        assert_eq!(array_chars(&[]), 2);
    }

    #[tokio::test]
    async fn persists_and_reloads_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("log.sqlite3")).unwrap();

        {
            let log = DebugLog::open(db.clone(), false).await.unwrap();
            log.append("first");
            log.append("second");
        }

        let reopened = DebugLog::open(db.clone(), false).await.unwrap();
        let messages: Vec<_> = reopened.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["second", "first"]);

        let cleared = DebugLog::open(db.clone(), true).await.unwrap();
        assert_eq!(cleared.len(), 0);
        assert_eq!(db.get_value(DEBUG_LOGS_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_stored_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("log.sqlite3")).unwrap();
        let log = DebugLog::open(db.clone(), false).await.unwrap();

        log.append("something");
        assert!(db.get_value(DEBUG_LOGS_KEY).await.unwrap().is_some());

        log.clear();
        assert!(log.entries().is_empty());
        assert_eq!(db.get_value(DEBUG_LOGS_KEY).await.unwrap(), None);
    }
}
