use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use rusqlite::params;

use crate::db::{
    helpers::{format_naive, parse_naive},
    Database,
};
use crate::models::SleepRecord;

impl Database {
    pub async fn insert_sleep_record(&self, record: &SleepRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sleep_records (id, bed_at, wake_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.id,
                    format_naive(&record.bed_at),
                    format_naive(&record.wake_at),
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert sleep record")?;
            Ok(())
        })
        .await
    }

    /// Nights that ended at or after `since`, oldest first.
    pub async fn sleep_records_since(&self, since: NaiveDateTime) -> Result<Vec<SleepRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, bed_at, wake_at
                 FROM sleep_records
                 WHERE wake_at >= ?1
                 ORDER BY wake_at ASC",
            )?;

            let mut rows = stmt.query(params![format_naive(&since)])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(SleepRecord {
                    id: row.get(0)?,
                    bed_at: parse_naive(&row.get::<_, String>(1)?, "bed_at")?,
                    wake_at: parse_naive(&row.get::<_, String>(2)?, "wake_at")?,
                });
            }
            Ok(records)
        })
        .await
    }
}
