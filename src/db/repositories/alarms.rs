use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{from_json, parse_datetime, to_json},
    Database,
};
use crate::models::{Alarm, AlarmTime};

fn row_to_alarm(row: &Row) -> Result<Alarm> {
    let time: String = row.get("time")?;
    let repeat_days: String = row.get("repeat_days")?;
    let smart: String = row.get("smart")?;
    let smart_schedule: Option<String> = row.get("smart_schedule")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Alarm {
        id: row.get("id")?,
        label: row.get("label")?,
        time: time
            .parse::<AlarmTime>()
            .context("failed to parse alarm time")?,
        repeat_days: from_json(&repeat_days, "repeat_days")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        smart: from_json(&smart, "smart")?,
        smart_schedule: smart_schedule
            .map(|raw| from_json(&raw, "smart_schedule"))
            .transpose()?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn upsert_alarm(&self, alarm: &Alarm) -> Result<()> {
        let record = alarm.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO alarms (id, label, time, repeat_days, enabled, smart, smart_schedule, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET
                     label = excluded.label,
                     time = excluded.time,
                     repeat_days = excluded.repeat_days,
                     enabled = excluded.enabled,
                     smart = excluded.smart,
                     smart_schedule = excluded.smart_schedule,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.label,
                    record.time.to_string(),
                    to_json(&record.repeat_days, "repeat_days")?,
                    i64::from(record.enabled),
                    to_json(&record.smart, "smart")?,
                    record
                        .smart_schedule
                        .as_ref()
                        .map(|schedule| to_json(schedule, "smart_schedule"))
                        .transpose()?,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to upsert alarm {}", record.id))?;
            Ok(())
        })
        .await
    }

    /// Returns `true` when a row was removed.
    pub async fn delete_alarm(&self, alarm_id: &str) -> Result<bool> {
        let alarm_id = alarm_id.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute("DELETE FROM alarms WHERE id = ?1", params![alarm_id])
                .with_context(|| format!("failed to delete alarm {alarm_id}"))?;
            Ok(removed > 0)
        })
        .await
    }

    pub async fn list_alarms(&self) -> Result<Vec<Alarm>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, label, time, repeat_days, enabled, smart, smart_schedule, created_at, updated_at
                 FROM alarms
                 ORDER BY time ASC, created_at ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut alarms = Vec::new();
            while let Some(row) = rows.next()? {
                alarms.push(row_to_alarm(row)?);
            }
            Ok(alarms)
        })
        .await
    }
}
