use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::agent::notifier::{ring_terminal_bell, Notifier, ToneFallback};
use crate::agent::protocol::{AgentCommand, AgentReply, AgentRequest, AgentResponse};
use crate::agent::store::{AgentMeta, ScheduleEntry, ScheduleStore};
use crate::agent::trigger::{self, Due};
use crate::agent::{AgentDeps, AgentTimings};
use crate::error::{AgentError, AgentResult};
use crate::models::{
    BackgroundAgentState, DeliveryPath, NotificationPermission, ScheduledAlarm,
    SyncFailureEntry, SyncReport, TriggeredEvent,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// The agent task. Owns the schedule store and the in-memory copy of it;
/// requests are handled one at a time, between firing passes.
pub(crate) struct AgentWorker {
    store: Arc<dyn ScheduleStore>,
    notifier: Arc<dyn Notifier>,
    tone: Arc<dyn ToneFallback>,
    clock: Arc<dyn crate::agent::Clock>,
    timings: AgentTimings,
    request_rx: mpsc::Receiver<AgentRequest>,
    event_tx: broadcast::Sender<TriggeredEvent>,
    entries: BTreeMap<String, ScheduleEntry>,
    meta: AgentMeta,
    initialized: bool,
    last_error: Option<String>,
}

impl AgentWorker {
    pub(crate) fn new(
        deps: AgentDeps,
        timings: AgentTimings,
        request_rx: mpsc::Receiver<AgentRequest>,
        event_tx: broadcast::Sender<TriggeredEvent>,
    ) -> Self {
        Self {
            store: deps.store,
            notifier: deps.notifier,
            tone: deps.tone,
            clock: deps.clock,
            timings,
            request_rx,
            event_tx,
            entries: BTreeMap::new(),
            meta: AgentMeta::default(),
            initialized: false,
            last_error: None,
        }
    }

    pub(crate) async fn run(mut self, cancel_token: CancellationToken) {
        log_info!("background agent started");
        loop {
            if self.initialized {
                self.fire_due().await;
            }
            let wait = self.next_wake();

            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => {
                        log_info!("agent request channel closed");
                        break;
                    }
                },
                _ = tokio::time::sleep(wait) => {}
                _ = cancel_token.cancelled() => {
                    log_info!("background agent shutting down");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, request: AgentRequest) {
        let AgentRequest {
            correlation_id,
            command,
            reply_tx,
        } = request;
        let operation = command.name();
        log_debug!("agent request {correlation_id}: {operation}");

        let result = self.dispatch(command).await;
        if let Err(err) = &result {
            log_warn!("agent {operation} failed: {err}");
        }

        if reply_tx
            .send(AgentResponse {
                correlation_id,
                result,
            })
            .is_err()
        {
            log_debug!("caller gave up on {operation} before the reply");
        }
    }

    async fn dispatch(&mut self, command: AgentCommand) -> AgentResult<AgentReply> {
        match command {
            AgentCommand::Initialize => self.initialize().await.map(AgentReply::State),
            _ if !self.initialized => Err(AgentError::NotInitialized),
            AgentCommand::SyncAlarms(alarms) => self.sync(alarms).await.map(AgentReply::Synced),
            AgentCommand::ScheduleOne(alarm) => {
                self.schedule_one(alarm).await.map(|_| AgentReply::Scheduled)
            }
            AgentCommand::CancelOne(alarm_id) => self
                .cancel_one(&alarm_id)
                .await
                .map(|removed| AgentReply::Cancelled { removed }),
            AgentCommand::RequestPermission => {
                Ok(AgentReply::Permission(self.request_permission().await))
            }
            AgentCommand::HealthCheck => Ok(AgentReply::State(self.health_check().await)),
        }
    }

    /// Rebuilds the in-memory schedule from the durable store.
    async fn initialize(&mut self) -> AgentResult<BackgroundAgentState> {
        let loaded = async {
            let entries = self.store.load_entries().await?;
            let meta = self.store.load_meta().await?;
            anyhow::Ok((entries, meta))
        }
        .await;

        let (entries, meta) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                self.initialized = false;
                let err = AgentError::InitializationFailure(format!("{err:#}"));
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };

        self.entries = entries
            .into_iter()
            .map(|entry| (entry.alarm_id.clone(), entry))
            .collect();
        self.meta = meta.unwrap_or_default();
        self.initialized = true;
        self.last_error = None;
        log_info!(
            "agent initialized with {} persisted alarm(s)",
            self.entries.len()
        );

        if self.meta.notification_permission == NotificationPermission::Default {
            self.request_permission().await;
        }
        Ok(self.snapshot())
    }

    async fn request_permission(&mut self) -> NotificationPermission {
        let permission = self.notifier.request_permission().await;
        if permission == NotificationPermission::Denied {
            log_warn!("{}; alarms will use the fallback tone", AgentError::PermissionDenied);
        }
        if permission != self.meta.notification_permission {
            self.meta.notification_permission = permission;
            self.persist_meta().await;
        }
        permission
    }

    async fn health_check(&mut self) -> BackgroundAgentState {
        self.meta.last_health_check_at = Some(self.clock.now_utc());
        self.persist_meta().await;
        self.snapshot()
    }

    async fn persist_meta(&mut self) {
        if let Err(err) = self.store.put_meta(&self.meta).await {
            log_error!("failed to persist agent metadata: {err:#}");
            self.last_error = Some(format!("metadata write failed: {err:#}"));
        }
    }

    /// Diffs the full desired set against the persisted schedule. Each write
    /// stands alone; a failed one keeps the previous state for that alarm.
    async fn sync(&mut self, alarms: Vec<ScheduledAlarm>) -> AgentResult<SyncReport> {
        let now = self.clock.now_local();
        let desired: BTreeMap<String, ScheduledAlarm> = alarms
            .into_iter()
            .filter(|alarm| alarm.enabled)
            .map(|alarm| (alarm.alarm_id.clone(), alarm))
            .collect();

        let mut report = SyncReport::default();

        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|alarm_id| !desired.contains_key(*alarm_id))
            .cloned()
            .collect();
        for alarm_id in stale {
            match self.store.delete_entry(&alarm_id).await {
                Ok(()) => {
                    self.entries.remove(&alarm_id);
                    report.removed.push(alarm_id);
                }
                Err(err) => report.failures.push(SyncFailureEntry {
                    alarm_id,
                    reason: format!("{err:#}"),
                }),
            }
        }

        for (alarm_id, alarm) in desired {
            let entry = match self.entries.get(&alarm_id) {
                Some(existing) if existing.same_trigger(&alarm) && existing.label == alarm.label => {
                    report.unchanged.push(alarm_id);
                    continue;
                }
                Some(existing) if existing.same_trigger(&alarm) => ScheduleEntry {
                    label: alarm.label.clone(),
                    ..existing.clone()
                },
                _ => ScheduleEntry::armed(&alarm, now),
            };

            match self.store.put_entry(&entry).await {
                Ok(()) => {
                    self.entries.insert(alarm_id.clone(), entry);
                    report.scheduled.push(alarm_id);
                }
                Err(err) => report.failures.push(SyncFailureEntry {
                    alarm_id,
                    reason: format!("{err:#}"),
                }),
            }
        }

        report.scheduled_alarm_count = self.entries.len();
        match report.failure_summary() {
            Some(summary) => {
                log_warn!(
                    "sync finished with {} failure(s), {} ok: {summary}",
                    report.failures.len(),
                    report.succeeded()
                );
                self.last_error = Some(summary.clone());
                if report.succeeded() == 0 {
                    return Err(AgentError::SyncFailure(summary));
                }
            }
            None => {
                log_info!(
                    "sync complete: {} scheduled, {} unchanged, {} removed",
                    report.scheduled.len(),
                    report.unchanged.len(),
                    report.removed.len()
                );
                self.last_error = None;
            }
        }
        Ok(report)
    }

    async fn schedule_one(&mut self, alarm: ScheduledAlarm) -> AgentResult<()> {
        if !alarm.enabled {
            return self.cancel_one(&alarm.alarm_id).await.map(|_| ());
        }

        let entry = match self.entries.get(&alarm.alarm_id) {
            Some(existing) if existing.same_trigger(&alarm) => ScheduleEntry {
                label: alarm.label.clone(),
                ..existing.clone()
            },
            _ => ScheduleEntry::armed(&alarm, self.clock.now_local()),
        };

        self.store.put_entry(&entry).await.map_err(|err| {
            AgentError::SyncFailure(format!("{}: {err:#}", alarm.alarm_id))
        })?;
        log_info!("alarm {} scheduled for {}", entry.alarm_id, entry.time);
        self.entries.insert(entry.alarm_id.clone(), entry);
        Ok(())
    }

    async fn cancel_one(&mut self, alarm_id: &str) -> AgentResult<bool> {
        if !self.entries.contains_key(alarm_id) {
            return Ok(false);
        }
        self.store
            .delete_entry(alarm_id)
            .await
            .map_err(|err| AgentError::SyncFailure(format!("{alarm_id}: {err:#}")))?;
        self.entries.remove(alarm_id);
        log_info!("alarm {alarm_id} cancelled");
        Ok(true)
    }

    fn snapshot(&self) -> BackgroundAgentState {
        let now = self.clock.now_local();
        BackgroundAgentState {
            scheduled_alarm_count: self.entries.len(),
            notification_permission: self.meta.notification_permission,
            last_health_check_at: self.meta.last_health_check_at,
            last_error: self.last_error.clone(),
            initialized: self.initialized,
            next_trigger_at: self
                .entries
                .values()
                .filter_map(|entry| trigger::next_pending(entry, now))
                .min(),
        }
    }

    /// Sleep until the earliest pending trigger, capped by the poll interval
    /// so clock jumps and suspensions are noticed.
    fn next_wake(&self) -> Duration {
        if !self.initialized {
            return self.timings.poll_interval;
        }
        let now = self.clock.now_local();
        self.entries
            .values()
            .filter_map(|entry| trigger::next_pending(entry, now))
            .min()
            .and_then(|next| (next - now).to_std().ok())
            .map_or(self.timings.poll_interval, |until| {
                until.min(self.timings.poll_interval)
            })
    }

    async fn fire_due(&mut self) {
        let now = self.clock.now_local();
        let due: Vec<(String, Due)> = self
            .entries
            .iter()
            .filter_map(|(alarm_id, entry)| {
                match trigger::evaluate(entry, now, self.timings.missed_alarm_grace) {
                    Due::NotYet => None,
                    due => Some((alarm_id.clone(), due)),
                }
            })
            .collect();

        for (alarm_id, due) in due {
            let Some(entry) = self.entries.get_mut(&alarm_id) else {
                continue;
            };
            let occurrence = match due {
                Due::Fire(occurrence) | Due::Missed(occurrence) => occurrence,
                Due::NotYet => continue,
            };
            // Marked before delivery so a crash mid-delivery never rings twice.
            entry.last_fired_at = Some(occurrence);
            let entry = entry.clone();
            if let Err(err) = self.store.put_entry(&entry).await {
                log_error!("failed to persist fired state for {alarm_id}: {err:#}");
            }

            let delivery = match due {
                Due::Missed(_) => {
                    log_warn!(
                        "alarm {alarm_id} missed: due at {occurrence}, agent resumed at {now}"
                    );
                    DeliveryPath::Missed
                }
                _ => self.deliver(&entry).await,
            };
            let event = TriggeredEvent {
                alarm_id: alarm_id.clone(),
                label: entry.label.clone(),
                fired_at: self.clock.now_utc(),
                scheduled_for: occurrence,
                delivery,
                one_shot: entry.is_one_shot(),
            };
            if delivery != DeliveryPath::Missed {
                log_info!("alarm {alarm_id} fired for {occurrence} via {delivery:?}");
            }
            if self.event_tx.send(event).is_err() {
                log_debug!("no foreground listening for alarm {alarm_id}");
            }
        }
    }

    /// Notification, then tone, then bell. Some signal always goes out.
    async fn deliver(&self, entry: &ScheduleEntry) -> DeliveryPath {
        let title = if entry.label.is_empty() {
            "Alarm".to_string()
        } else {
            entry.label.clone()
        };
        let body = format!("It's {}", entry.time);

        if self.meta.notification_permission == NotificationPermission::Granted {
            let sent = tokio::time::timeout(
                self.timings.notify_timeout,
                self.notifier.notify(&title, &body),
            )
            .await;
            let failure = match sent {
                Ok(Ok(())) => return DeliveryPath::Notification,
                Ok(Err(err)) => format!("{err:#}"),
                Err(_) => format!(
                    "notification timed out after {}ms",
                    self.timings.notify_timeout.as_millis()
                ),
            };
            log_warn!(
                "{}; falling back to tone",
                AgentError::TriggerDeliveryFailure(failure)
            );
        }

        let tone = Arc::clone(&self.tone);
        let played = tokio::task::spawn_blocking(move || tone.play_alarm_tone()).await;
        match played {
            Ok(Ok(())) => DeliveryPath::Tone,
            Ok(Err(err)) => {
                log_warn!("alarm tone unavailable ({err:#}); ringing terminal bell");
                self.ring_bell()
            }
            Err(join_err) => {
                log_error!("alarm tone task failed: {join_err}");
                self.ring_bell()
            }
        }
    }

    fn ring_bell(&self) -> DeliveryPath {
        if let Err(err) = ring_terminal_bell() {
            log_error!("{err:#}");
        }
        DeliveryPath::Bell
    }
}
