use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::Database;

/// Plain key/value access to the agent's schedule database. Values are JSON
/// documents; the agent decides what they mean.
impl Database {
    pub async fn kv_put(&self, key: &str, value: String) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO schedule_kv (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write schedule key {key}"))?;
            Ok(())
        })
        .await
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM schedule_kv WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn kv_delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM schedule_kv WHERE key = ?1", params![key])
                .with_context(|| format!("failed to delete schedule key {key}"))?;
            Ok(())
        })
        .await
    }

    pub async fn kv_scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let prefix = prefix.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value FROM schedule_kv
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
            )?;
            let pairs = stmt
                .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<(String, String)>, _>>()?;
            Ok(pairs)
        })
        .await
    }
}
