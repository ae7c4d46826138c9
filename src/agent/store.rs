//! The agent's durable schedule: one `alarm/<id>` entry per scheduled alarm
//! and a single `meta` entry, JSON encoded.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::models::{AlarmTime, NotificationPermission, RepeatDays, ScheduledAlarm};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const ALARM_KEY_PREFIX: &str = "alarm/";
pub const META_KEY: &str = "meta";

pub fn alarm_key(alarm_id: &str) -> String {
    format!("{ALARM_KEY_PREFIX}{alarm_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub alarm_id: String,
    pub label: String,
    pub time: AlarmTime,
    pub repeat_days: RepeatDays,
    pub enabled: bool,
    /// When this trigger was (re)written; occurrences before it never fire.
    pub armed_at: NaiveDateTime,
    pub last_fired_at: Option<NaiveDateTime>,
}

impl ScheduleEntry {
    pub fn armed(alarm: &ScheduledAlarm, armed_at: NaiveDateTime) -> Self {
        Self {
            alarm_id: alarm.alarm_id.clone(),
            label: alarm.label.clone(),
            time: alarm.time,
            repeat_days: alarm.repeat_days.clone(),
            enabled: alarm.enabled,
            armed_at,
            last_fired_at: None,
        }
    }

    /// Same time and repeat pattern; the fired state can be carried over.
    pub fn same_trigger(&self, alarm: &ScheduledAlarm) -> bool {
        self.time == alarm.time && self.repeat_days == alarm.repeat_days
    }

    pub fn is_one_shot(&self) -> bool {
        self.repeat_days.is_one_shot()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentMeta {
    pub notification_permission: NotificationPermission,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

/// Durable storage owned by the background agent. Nothing else writes to it.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn load_entries(&self) -> Result<Vec<ScheduleEntry>>;
    async fn put_entry(&self, entry: &ScheduleEntry) -> Result<()>;
    async fn delete_entry(&self, alarm_id: &str) -> Result<()>;
    async fn load_meta(&self) -> Result<Option<AgentMeta>>;
    async fn put_meta(&self, meta: &AgentMeta) -> Result<()>;
}

fn decode_entries(pairs: Vec<(String, String)>) -> (Vec<ScheduleEntry>, Vec<String>) {
    let mut entries = Vec::with_capacity(pairs.len());
    let mut corrupt = Vec::new();
    for (key, value) in pairs {
        match serde_json::from_str::<ScheduleEntry>(&value) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                log_warn!("dropping unreadable schedule entry {key}: {err}");
                corrupt.push(key);
            }
        }
    }
    (entries, corrupt)
}

/// Unreadable metadata is treated as absent; the agent starts from defaults.
fn decode_meta(raw: Option<String>) -> Option<AgentMeta> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(meta) => Some(meta),
        Err(err) => {
            log_warn!("ignoring unreadable agent metadata: {err}");
            None
        }
    }
}

/// SQLite-backed store over the `schedule_kv` table.
#[derive(Clone)]
pub struct SqliteScheduleStore {
    db: Database,
}

impl SqliteScheduleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn load_entries(&self) -> Result<Vec<ScheduleEntry>> {
        let pairs = self.db.kv_scan_prefix(ALARM_KEY_PREFIX).await?;
        let (entries, corrupt) = decode_entries(pairs);
        for key in corrupt {
            self.db.kv_delete(&key).await?;
        }
        Ok(entries)
    }

    async fn put_entry(&self, entry: &ScheduleEntry) -> Result<()> {
        let value = serde_json::to_string(entry).context("failed to encode schedule entry")?;
        self.db.kv_put(&alarm_key(&entry.alarm_id), value).await
    }

    async fn delete_entry(&self, alarm_id: &str) -> Result<()> {
        self.db.kv_delete(&alarm_key(alarm_id)).await
    }

    async fn load_meta(&self) -> Result<Option<AgentMeta>> {
        Ok(decode_meta(self.db.kv_get(META_KEY).await?))
    }

    async fn put_meta(&self, meta: &AgentMeta) -> Result<()> {
        let value = serde_json::to_string(meta).context("failed to encode agent metadata")?;
        self.db.kv_put(META_KEY, value).await
    }
}

/// Keeps the same key layout in memory. Used when no data directory is
/// available and as the base of the test fakes.
#[derive(Default)]
pub struct MemoryScheduleStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> Result<T> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| anyhow!("schedule store lock poisoned"))?;
        Ok(f(&mut guard))
    }

    /// Raw key/value contents, for inspection.
    pub fn dump(&self) -> Result<BTreeMap<String, String>> {
        self.with_values(|values| values.clone())
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn load_entries(&self) -> Result<Vec<ScheduleEntry>> {
        let pairs = self.with_values(|values| {
            values
                .range(ALARM_KEY_PREFIX.to_string()..)
                .take_while(|(key, _)| key.starts_with(ALARM_KEY_PREFIX))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Vec<_>>()
        })?;
        let (entries, corrupt) = decode_entries(pairs);
        self.with_values(|values| {
            for key in corrupt {
                values.remove(&key);
            }
        })?;
        Ok(entries)
    }

    async fn put_entry(&self, entry: &ScheduleEntry) -> Result<()> {
        let value = serde_json::to_string(entry).context("failed to encode schedule entry")?;
        self.with_values(|values| {
            values.insert(alarm_key(&entry.alarm_id), value);
        })
    }

    async fn delete_entry(&self, alarm_id: &str) -> Result<()> {
        self.with_values(|values| {
            values.remove(&alarm_key(alarm_id));
        })
    }

    async fn load_meta(&self) -> Result<Option<AgentMeta>> {
        let raw = self.with_values(|values| values.get(META_KEY).cloned())?;
        Ok(decode_meta(raw))
    }

    async fn put_meta(&self, meta: &AgentMeta) -> Result<()> {
        let value = serde_json::to_string(meta).context("failed to encode agent metadata")?;
        self.with_values(|values| {
            values.insert(META_KEY.to_string(), value);
        })
    }
}
