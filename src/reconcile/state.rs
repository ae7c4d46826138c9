use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BackgroundAgentState, NotificationPermission, SyncReport};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Synced,
    Diverged,
    Reconciling,
    /// Alarms are scheduled but delivery is limited (permission denied), or
    /// the agent could not be initialized at all.
    Degraded,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Diverged
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileState {
    pub status: SyncStatus,
    pub agent: Option<BackgroundAgentState>,
    pub last_error: Option<String>,
    pub last_report: Option<SyncReport>,
    pub consecutive_failures: u32,
    /// Registry generation the agent was last fully synced to.
    pub synced_generation: Option<u64>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub reconciliations: u64,
}

impl ReconcileState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previous status when it actually changed.
    pub fn transition(&mut self, to: SyncStatus) -> Option<SyncStatus> {
        let from = self.status;
        self.status = to;
        (from != to).then_some(from)
    }

    pub fn permission_denied(&self) -> bool {
        self.agent
            .as_ref()
            .is_some_and(|agent| agent.notification_permission == NotificationPermission::Denied)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.synced_generation == Some(generation)
    }

    pub(crate) fn record_failure(&mut self, error: String) {
        self.consecutive_failures += 1;
        self.last_error = Some(error);
    }

    pub(crate) fn record_success(&mut self, generation: u64, report: SyncReport) {
        self.consecutive_failures = 0;
        self.last_error = None;
        self.synced_generation = Some(generation);
        self.last_synced_at = Some(Utc::now());
        self.last_report = Some(report);
    }

    /// Where a fully successful sync leaves the machine.
    pub(crate) fn settled_status(&self) -> SyncStatus {
        if self.permission_denied() {
            SyncStatus::Degraded
        } else {
            SyncStatus::Synced
        }
    }
}
