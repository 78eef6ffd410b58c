use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Database;

pub struct KvRepository<'a> {
    conn: &'a Connection,
}

impl<'a> KvRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read key '{key}'"))
    }

    /// Upsert; the previous value is overwritten.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO kv_store (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .with_context(|| format!("failed to write key '{key}'"))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .with_context(|| format!("failed to remove key '{key}'"))?;
        Ok(())
    }
}

impl Database {
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| KvRepository::new(conn).get(&key))
            .await
    }

    pub async fn put_value(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| KvRepository::new(conn).put(&key, &value))
            .await
    }

    pub async fn remove_value(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| KvRepository::new(conn).remove(&key))
            .await
    }

    /// Fire-and-forget variant of [`Database::put_value`].
    pub fn put_value_detached(&self, key: &'static str, value: String) -> Result<()> {
        self.submit(key, move |conn| KvRepository::new(conn).put(key, &value))
    }

    /// Fire-and-forget variant of [`Database::remove_value`].
    pub fn remove_value_detached(&self, key: &'static str) -> Result<()> {
        self.submit(key, move |conn| KvRepository::new(conn).remove(key))
    }
}
