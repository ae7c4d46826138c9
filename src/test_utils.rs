//! Fakes shared by the unit tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::agent::store::{AgentMeta, MemoryScheduleStore, ScheduleEntry, ScheduleStore};
use crate::agent::{Clock, Notifier, ToneFallback};
use crate::models::{Alarm, NotificationPermission, RepeatDays, SmartSettings};

/// June 2026; the 1st is a Monday.
pub fn dt(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 6, day)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

pub fn alarm(id: &str, time: &str, repeat_days: RepeatDays, enabled: bool) -> Alarm {
    Alarm {
        id: id.to_string(),
        label: format!("alarm {id}"),
        time: time.parse().unwrap(),
        repeat_days,
        enabled,
        smart: SmartSettings::default(),
        smart_schedule: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_local(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.now_local())
    }
}

/// In-memory store that can be told to fail or stall.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryScheduleStore,
    failing_ids: Mutex<HashSet<String>>,
    fail_all_writes: AtomicBool,
    fail_loads: AtomicBool,
    stall: Mutex<Duration>,
}

impl FlakyStore {
    pub fn fail_writes_for(&self, alarm_id: &str) {
        self.failing_ids.lock().unwrap().insert(alarm_id.to_string());
    }

    pub fn fail_all_writes(&self) {
        self.fail_all_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_loads(&self) {
        self.fail_loads.store(true, Ordering::SeqCst);
    }

    pub fn stall_writes(&self, by: Duration) {
        *self.stall.lock().unwrap() = by;
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.dump().unwrap()
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.snapshot()
            .keys()
            .filter_map(|key| key.strip_prefix("alarm/"))
            .map(str::to_string)
            .collect()
    }

    async fn maybe_stall(&self) {
        let stall = *self.stall.lock().unwrap();
        if !stall.is_zero() {
            tokio::time::sleep(stall).await;
        }
    }

    fn check_write(&self, alarm_id: &str) -> Result<()> {
        if self.fail_all_writes.load(Ordering::SeqCst)
            || self.failing_ids.lock().unwrap().contains(alarm_id)
        {
            bail!("disk full while writing {alarm_id}");
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for FlakyStore {
    async fn load_entries(&self) -> Result<Vec<ScheduleEntry>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            bail!("schedule store is unreadable");
        }
        self.inner.load_entries().await
    }

    async fn put_entry(&self, entry: &ScheduleEntry) -> Result<()> {
        self.maybe_stall().await;
        self.check_write(&entry.alarm_id)?;
        self.inner.put_entry(entry).await
    }

    async fn delete_entry(&self, alarm_id: &str) -> Result<()> {
        self.check_write(alarm_id)?;
        self.inner.delete_entry(alarm_id).await
    }

    async fn load_meta(&self) -> Result<Option<AgentMeta>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            bail!("schedule store is unreadable");
        }
        self.inner.load_meta().await
    }

    async fn put_meta(&self, meta: &AgentMeta) -> Result<()> {
        self.maybe_stall().await;
        self.inner.put_meta(meta).await
    }
}

pub struct RecordingNotifier {
    permission: NotificationPermission,
    fail: AtomicBool,
    hang: AtomicBool,
    requests: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn granting() -> Self {
        Self::with_permission(NotificationPermission::Granted)
    }

    pub fn denying() -> Self {
        Self::with_permission(NotificationPermission::Denied)
    }

    fn with_permission(permission: NotificationPermission) -> Self {
        Self {
            permission,
            fail: AtomicBool::new(false),
            hang: AtomicBool::new(false),
            requests: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Every later `notify` call never completes.
    pub fn hang_sends(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn permission_requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn request_permission(&self) -> NotificationPermission {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.permission
    }

    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("notification service unavailable");
        }
        self.sent
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct SilentTone {
    plays: AtomicUsize,
    fail: AtomicBool,
}

impl SilentTone {
    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn fail_plays(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl ToneFallback for SilentTone {
    fn play_alarm_tone(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("no audio output device");
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
