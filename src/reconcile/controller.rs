use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rand::Rng;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, watch, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    agent::BackgroundScheduler,
    error::{AgentError, AgentResult},
    models::{DeliveryPath, NotificationPermission, TriggeredEvent},
    registry::AlarmRegistry,
};

use super::{ReconcileState, SyncStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const RETRY_BASE: Duration = Duration::from_secs(2);

struct Workers {
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Keeps the background agent's schedule equal to the registry's enabled
/// alarms. Drives the Synced / Diverged / Reconciling / Degraded machine.
#[derive(Clone)]
pub struct ReconcileController {
    agent: Arc<dyn BackgroundScheduler>,
    registry: AlarmRegistry,
    state: Arc<Mutex<ReconcileState>>,
    in_flight: Arc<Mutex<()>>,
    workers: Arc<Mutex<Option<Workers>>>,
    health_interval: Duration,
}

impl ReconcileController {
    pub fn new(
        agent: Arc<dyn BackgroundScheduler>,
        registry: AlarmRegistry,
        health_interval: Duration,
    ) -> Self {
        Self {
            agent,
            registry,
            state: Arc::new(Mutex::new(ReconcileState::new())),
            in_flight: Arc::new(Mutex::new(())),
            workers: Arc::new(Mutex::new(None)),
            health_interval,
        }
    }

    pub async fn state(&self) -> ReconcileState {
        self.state.lock().await.clone()
    }

    /// Initializes the agent, runs a first full sync and starts the health
    /// loop plus the triggered-event listener. Never fails; problems show up
    /// in the returned state.
    pub async fn start(&self) -> ReconcileState {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return self.state().await;
        }

        if self.initialize_agent().await {
            self.reconcile_now().await;
        }

        let cancel_token = CancellationToken::new();
        let health = tokio::spawn(self.clone().health_loop(
            self.registry.subscribe(),
            cancel_token.clone(),
        ));
        let listener = tokio::spawn(forward_triggered(
            self.registry.clone(),
            self.agent.on_triggered(),
            cancel_token.clone(),
        ));
        *workers = Some(Workers {
            cancel_token,
            handles: vec![health, listener],
        });

        self.state().await
    }

    pub async fn shutdown(&self) {
        let Some(workers) = self.workers.lock().await.take() else {
            return;
        };
        workers.cancel_token.cancel();
        for handle in workers.handles {
            if let Err(err) = handle.await {
                log_error!("reconcile worker failed to join: {err}");
            }
        }
    }

    pub async fn request_notification_permission(&self) -> AgentResult<NotificationPermission> {
        let permission = self.agent.request_notification_permission().await?;
        let mut state = self.state.lock().await;
        if let Some(agent) = state.agent.as_mut() {
            agent.notification_permission = permission;
        }
        if permission == NotificationPermission::Granted && state.status == SyncStatus::Degraded {
            // Re-evaluated against the agent on the next health check.
            state.synced_generation = None;
        }
        Ok(permission)
    }

    /// One poll of the agent. Repairs drift when the agent's count or the
    /// registry generation disagree with the last sync.
    pub async fn health_check_once(&self) -> ReconcileState {
        let generation = self.registry.generation();

        match self.agent.health_check().await {
            Ok(agent_state) => {
                let expected = self.registry.enabled_count().await;
                let actual = agent_state.scheduled_alarm_count;
                let current = {
                    let mut state = self.state.lock().await;
                    state.last_check_at = Some(Utc::now());
                    state.agent = Some(agent_state);
                    state.is_current(generation)
                };

                if actual != expected || !current {
                    log_warn!(
                        "agent holds {actual} alarm(s), registry expects {expected} (generation {generation}, current: {current})"
                    );
                    self.set_status(SyncStatus::Diverged).await;
                    self.reconcile_now().await;
                } else {
                    let mut state = self.state.lock().await;
                    let settled = state.settled_status();
                    if let Some(from) = state.transition(settled) {
                        log_info!("reconcile {from:?} -> {settled:?}");
                    }
                }
            }
            Err(err) => {
                log_warn!("health check failed: {err}");
                self.record_failure(&err).await;
                self.set_status(SyncStatus::Diverged).await;
                if self.initialize_agent().await {
                    self.reconcile_now().await;
                }
            }
        }

        self.state().await
    }

    /// Pushes the registry's full alarm set to the agent. Runs are
    /// serialized; a registry change that lands mid-run is synced right
    /// after it.
    pub async fn reconcile_now(&self) -> ReconcileState {
        let _in_flight = self.in_flight.lock().await;
        let mut reinitialized = false;

        loop {
            let generation = self.registry.generation();
            {
                let state = self.state.lock().await;
                if state.is_current(generation) && state.status != SyncStatus::Diverged {
                    break;
                }
            }

            let alarms = self.registry.list().await;
            self.set_status(SyncStatus::Reconciling).await;
            log_debug!("syncing {} alarm(s) at generation {generation}", alarms.len());

            match self.agent.sync_alarms(&alarms).await {
                Ok(report) if report.is_complete() => {
                    let mut state = self.state.lock().await;
                    state.reconciliations += 1;
                    if let Some(agent) = state.agent.as_mut() {
                        agent.scheduled_alarm_count = report.scheduled_alarm_count;
                    }
                    log_info!(
                        "synced generation {generation}: {} scheduled, {} unchanged, {} removed",
                        report.scheduled.len(),
                        report.unchanged.len(),
                        report.removed.len()
                    );
                    state.record_success(generation, report);
                    let settled = state.settled_status();
                    if let Some(from) = state.transition(settled) {
                        log_info!("reconcile {from:?} -> {settled:?}");
                    }
                }
                Ok(report) => {
                    let summary = report.failure_summary().unwrap_or_default();
                    log_warn!(
                        "partial sync at generation {generation}: {} ok, failed: {summary}",
                        report.succeeded()
                    );
                    let mut state = self.state.lock().await;
                    state.reconciliations += 1;
                    state.record_failure(format!("partial sync: {summary}"));
                    state.last_report = Some(report);
                    if let Some(from) = state.transition(SyncStatus::Diverged) {
                        log_info!("reconcile {from:?} -> Diverged");
                    }
                    break;
                }
                Err(err) if err.needs_reinitialize() && !reinitialized => {
                    log_warn!("agent lost its initialization ({err}); re-initializing");
                    reinitialized = true;
                    if !self.initialize_agent().await {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    log_error!("sync failed at generation {generation}: {err}");
                    self.record_failure(&err).await;
                    let status = match err {
                        AgentError::InitializationFailure(_) => SyncStatus::Degraded,
                        _ => SyncStatus::Diverged,
                    };
                    self.set_status(status).await;
                    break;
                }
            }

            if self.registry.generation() == generation {
                break;
            }
            log_debug!("registry changed during sync; syncing again");
        }

        self.state().await
    }

    /// Returns whether the agent is usable.
    async fn initialize_agent(&self) -> bool {
        match self.agent.initialize().await {
            Ok(agent_state) => {
                log_info!(
                    "agent initialized: {} alarm(s) persisted, notifications {}",
                    agent_state.scheduled_alarm_count,
                    agent_state.notification_permission.as_str()
                );
                let mut state = self.state.lock().await;
                state.agent = Some(agent_state);
                // The persisted schedule may predate the registry's state.
                state.synced_generation = None;
                true
            }
            Err(err) => {
                log_error!("agent initialization failed: {err}");
                self.record_failure(&err).await;
                self.set_status(SyncStatus::Degraded).await;
                false
            }
        }
    }

    async fn set_status(&self, to: SyncStatus) {
        let mut state = self.state.lock().await;
        if let Some(from) = state.transition(to) {
            log_info!("reconcile {from:?} -> {to:?}");
        }
    }

    async fn record_failure(&self, err: &AgentError) {
        let mut state = self.state.lock().await;
        state.record_failure(err.to_string());
        if let Some(agent) = state.agent.as_mut() {
            agent.last_error = Some(err.to_string());
        }
    }

    async fn next_delay(&self) -> Duration {
        let state = self.state.lock().await;
        if state.consecutive_failures == 0 {
            self.health_interval
        } else {
            retry_delay(state.consecutive_failures, self.health_interval)
        }
    }

    async fn health_loop(self, mut changes: watch::Receiver<u64>, cancel_token: CancellationToken) {
        let mut deadline = Instant::now() + self.next_delay().await;

        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => {
                    self.health_check_once().await;
                    deadline = Instant::now() + self.next_delay().await;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        log_info!("registry dropped; health loop exiting");
                        break;
                    }
                    let generation = *changes.borrow_and_update();
                    if !self.state.lock().await.is_current(generation) {
                        self.reconcile_now().await;
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!("health loop shutting down");
                    break;
                }
            }
        }
    }
}

/// Exponential backoff from [`RETRY_BASE`], capped at `ceiling`, with
/// +/-20% jitter.
fn retry_delay(failures: u32, ceiling: Duration) -> Duration {
    let exponent = failures.saturating_sub(1).min(10);
    let base = RETRY_BASE.saturating_mul(1 << exponent).min(ceiling);
    let jitter: f64 = rand::thread_rng().gen_range(0.8..1.2);
    base.mul_f64(jitter).min(ceiling)
}

async fn forward_triggered(
    registry: AlarmRegistry,
    mut events: broadcast::Receiver<TriggeredEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if event.delivery == DeliveryPath::Missed {
                        log_warn!(
                            "alarm {} missed its {} occurrence",
                            event.alarm_id,
                            event.scheduled_for
                        );
                    } else {
                        log_info!(
                            "alarm {} fired at {} via {:?}",
                            event.alarm_id,
                            event.fired_at,
                            event.delivery
                        );
                    }
                    if let Err(err) = registry.handle_triggered(&event).await {
                        log_error!("failed to record trigger for {}: {err}", event.alarm_id);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("missed {skipped} triggered event(s); next health check will reconcile");
                }
                Err(RecvError::Closed) => {
                    log_info!("triggered event channel closed");
                    break;
                }
            },
            _ = cancel_token.cancelled() => break,
        }
    }
}
