//! Types exchanged with the background agent.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alarm::{Alarm, AlarmTime, RepeatDays};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum NotificationPermission {
    Granted,
    Denied,
    #[default]
    Default,
}

impl NotificationPermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPermission::Granted => "granted",
            NotificationPermission::Denied => "denied",
            NotificationPermission::Default => "default",
        }
    }
}

/// What the agent is asked to schedule: the effective trigger, not the
/// user-facing alarm record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledAlarm {
    pub alarm_id: String,
    pub label: String,
    pub time: AlarmTime,
    pub repeat_days: RepeatDays,
    pub enabled: bool,
}

impl From<&Alarm> for ScheduledAlarm {
    fn from(alarm: &Alarm) -> Self {
        Self {
            alarm_id: alarm.id.clone(),
            label: alarm.label.clone(),
            time: alarm.trigger_time(),
            repeat_days: alarm.repeat_days.clone(),
            enabled: alarm.enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundAgentState {
    pub scheduled_alarm_count: usize,
    pub notification_permission: NotificationPermission,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub initialized: bool,
    pub next_trigger_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryPath {
    Notification,
    Tone,
    Bell,
    /// Found past the grace period; nothing rang.
    Missed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredEvent {
    pub alarm_id: String,
    pub label: String,
    pub fired_at: DateTime<Utc>,
    pub scheduled_for: NaiveDateTime,
    pub delivery: DeliveryPath,
    pub one_shot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailureEntry {
    pub alarm_id: String,
    pub reason: String,
}

/// Per-alarm outcome of a sync; one bad entry never hides the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub scheduled: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub failures: Vec<SyncFailureEntry>,
    pub scheduled_alarm_count: usize,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.scheduled.len() + self.unchanged.len() + self.removed.len()
    }

    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.alarm_id, failure.reason))
            .collect();
        Some(parts.join("; "))
    }
}
