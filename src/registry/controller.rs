use std::{collections::BTreeMap, sync::Arc};

use chrono::{Duration, Local, NaiveDateTime, Utc};
use log::{info, warn};
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::{
    analysis::ScheduleAnalyzer,
    db::Database,
    error::{RegistryError, RegistryResult},
    models::{
        Alarm, AlarmDraft, ScheduleAnalysis, SleepGoal, SleepRecord, TriggeredEvent,
    },
    optimizer::WakeTimeOptimizer,
    settings::SettingsStore,
};

use super::validate;

/// Foreground source of truth for alarms. Every schedule-relevant change
/// bumps a generation counter that the reconciler watches.
#[derive(Clone)]
pub struct AlarmRegistry {
    db: Database,
    alarms: Arc<RwLock<BTreeMap<String, Alarm>>>,
    settings: Arc<SettingsStore>,
    analyzer: ScheduleAnalyzer,
    optimizer: WakeTimeOptimizer,
    changes: Arc<watch::Sender<u64>>,
    edit_lock: Arc<Mutex<()>>,
}

impl AlarmRegistry {
    pub async fn load(
        db: Database,
        settings: Arc<SettingsStore>,
        analyzer: ScheduleAnalyzer,
        optimizer: WakeTimeOptimizer,
    ) -> RegistryResult<Self> {
        let stored = db.list_alarms().await?;
        info!("Loaded {} alarm(s) from registry", stored.len());
        let alarms = stored
            .into_iter()
            .map(|alarm| (alarm.id.clone(), alarm))
            .collect();

        let (changes, _) = watch::channel(0u64);
        Ok(Self {
            db,
            alarms: Arc::new(RwLock::new(alarms)),
            settings,
            analyzer,
            optimizer,
            changes: Arc::new(changes),
            edit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.changes.borrow()
    }

    fn bump(&self, reason: &str) {
        self.changes.send_modify(|generation| *generation += 1);
        info!("Alarm set changed ({reason}); generation {}", self.generation());
    }

    /// Ordered by trigger time, then creation.
    pub async fn list(&self) -> Vec<Alarm> {
        let mut alarms: Vec<Alarm> = self.alarms.read().await.values().cloned().collect();
        alarms.sort_by(|a, b| a.time.cmp(&b.time).then(a.created_at.cmp(&b.created_at)));
        alarms
    }

    pub async fn get(&self, alarm_id: &str) -> Option<Alarm> {
        self.alarms.read().await.get(alarm_id).cloned()
    }

    pub async fn enabled_count(&self) -> usize {
        self.alarms
            .read()
            .await
            .values()
            .filter(|alarm| alarm.enabled)
            .count()
    }

    pub async fn create(&self, draft: AlarmDraft) -> RegistryResult<Alarm> {
        let _edit = self.edit_lock.lock().await;
        let now = Utc::now();
        let alarm = Alarm {
            id: Uuid::new_v4().to_string(),
            label: draft.label.trim().to_string(),
            time: draft.time,
            repeat_days: draft.repeat_days,
            enabled: draft.enabled,
            smart: draft.smart,
            smart_schedule: None,
            created_at: now,
            updated_at: now,
        };
        validate(&alarm)?;

        let (goal, analysis) = self.current_analysis().await?;
        let alarm = self.with_smart_schedule(alarm, &goal, &analysis);
        self.db.upsert_alarm(&alarm).await?;
        self.alarms
            .write()
            .await
            .insert(alarm.id.clone(), alarm.clone());

        if alarm.enabled {
            self.bump("alarm created");
        }
        Ok(alarm)
    }

    /// Replaces the user-editable fields of an existing alarm.
    pub async fn update(&self, alarm: Alarm) -> RegistryResult<Alarm> {
        let _edit = self.edit_lock.lock().await;
        let existing = self
            .get(&alarm.id)
            .await
            .ok_or_else(|| RegistryError::NotFound(alarm.id.clone()))?;

        let updated = Alarm {
            label: alarm.label.trim().to_string(),
            created_at: existing.created_at,
            updated_at: Utc::now(),
            ..alarm
        };
        validate(&updated)?;

        let (goal, analysis) = self.current_analysis().await?;
        let updated = self.with_smart_schedule(updated, &goal, &analysis);
        self.db.upsert_alarm(&updated).await?;
        self.alarms
            .write()
            .await
            .insert(updated.id.clone(), updated.clone());

        if updated.schedule_differs(&existing) {
            self.bump("alarm updated");
        }
        Ok(updated)
    }

    pub async fn delete(&self, alarm_id: &str) -> RegistryResult<()> {
        let _edit = self.edit_lock.lock().await;
        if !self.db.delete_alarm(alarm_id).await? {
            return Err(RegistryError::NotFound(alarm_id.to_string()));
        }
        let removed = self.alarms.write().await.remove(alarm_id);
        if removed.is_some_and(|alarm| alarm.enabled) {
            self.bump("alarm deleted");
        }
        Ok(())
    }

    /// Current analysis over the configured history window.
    pub async fn analysis(&self) -> RegistryResult<ScheduleAnalysis> {
        Ok(self.current_analysis().await?.1)
    }

    pub async fn record_sleep(
        &self,
        bed_at: NaiveDateTime,
        wake_at: NaiveDateTime,
    ) -> RegistryResult<SleepRecord> {
        let record = SleepRecord::new(bed_at, wake_at);
        if !record.is_plausible() {
            return Err(RegistryError::InvalidSleepRecord);
        }
        self.db.insert_sleep_record(&record).await?;
        self.refresh_smart_schedules().await?;
        Ok(record)
    }

    pub async fn update_sleep_goal(&self, goal: SleepGoal) -> RegistryResult<()> {
        self.settings.update_sleep_goal(goal)?;
        self.refresh_smart_schedules().await?;
        Ok(())
    }

    /// Recomputes every smart alarm's suggestion. Returns how many alarms
    /// ended up with a different effective trigger time.
    pub async fn refresh_smart_schedules(&self) -> RegistryResult<usize> {
        let _edit = self.edit_lock.lock().await;
        let (goal, analysis) = self.current_analysis().await?;

        let smart: Vec<Alarm> = self
            .alarms
            .read()
            .await
            .values()
            .filter(|alarm| alarm.smart.smart_enabled)
            .cloned()
            .collect();

        let mut moved = 0;
        for existing in smart {
            let refreshed = self.with_smart_schedule(existing.clone(), &goal, &analysis);
            if refreshed.smart_schedule == existing.smart_schedule {
                continue;
            }
            self.db.upsert_alarm(&refreshed).await?;
            if refreshed.enabled && refreshed.trigger_time() != existing.trigger_time() {
                moved += 1;
            }
            self.alarms
                .write()
                .await
                .insert(refreshed.id.clone(), refreshed);
        }

        if moved > 0 {
            self.bump("smart schedules moved");
        }
        Ok(moved)
    }

    /// A fired or missed one-shot alarm is done: disable it so the next sync
    /// drops it from the agent. Returns whether anything changed.
    pub async fn handle_triggered(&self, event: &TriggeredEvent) -> RegistryResult<bool> {
        let _edit = self.edit_lock.lock().await;
        let Some(alarm) = self.get(&event.alarm_id).await else {
            warn!("Triggered event for unknown alarm {}", event.alarm_id);
            return Ok(false);
        };
        if !alarm.repeat_days.is_one_shot() || !alarm.enabled {
            return Ok(false);
        }

        let disabled = Alarm {
            enabled: false,
            updated_at: Utc::now(),
            ..alarm
        };
        self.db.upsert_alarm(&disabled).await?;
        self.alarms
            .write()
            .await
            .insert(disabled.id.clone(), disabled);
        self.bump("one-shot alarm fired");
        Ok(true)
    }

    async fn current_analysis(&self) -> RegistryResult<(SleepGoal, ScheduleAnalysis)> {
        let goal = self.settings.sleep_goal()?;
        let window_days = self.settings.scheduler()?.history_window_days;
        let since = Local::now().naive_local() - Duration::days(i64::from(window_days));
        let history = self.db.sleep_records_since(since).await?;
        let analysis = self.analyzer.analyze(&history, &goal);
        Ok((goal, analysis))
    }

    fn with_smart_schedule(
        &self,
        mut alarm: Alarm,
        goal: &SleepGoal,
        analysis: &ScheduleAnalysis,
    ) -> Alarm {
        alarm.smart_schedule = if alarm.smart.smart_enabled {
            Some(self.optimizer.suggest_time(&alarm, goal, analysis))
        } else {
            None
        };
        alarm
    }
}
