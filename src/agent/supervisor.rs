use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::{broadcast, Mutex};

use crate::agent::{
    spawn_agent, AgentClient, AgentDeps, AgentHandle, AgentTimings, BackgroundScheduler,
    EVENT_CHANNEL_CAPACITY,
};
use crate::error::{AgentError, AgentResult};
use crate::models::{
    Alarm, BackgroundAgentState, NotificationPermission, SyncReport, TriggeredEvent,
};

struct Running {
    client: AgentClient,
    handle: Option<AgentHandle>,
}

/// Keeps one agent alive over a fixed set of dependencies. When the agent
/// stops answering, the next call respawns it over the same durable store;
/// the fresh agent must be initialized again, which the reconciler does.
pub struct SupervisedAgent {
    deps: AgentDeps,
    timings: AgentTimings,
    event_tx: broadcast::Sender<TriggeredEvent>,
    running: Mutex<Running>,
    restarts: AtomicU64,
}

impl SupervisedAgent {
    pub fn start(deps: AgentDeps, timings: AgentTimings) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (client, handle) = spawn_agent(deps.clone(), timings, event_tx.clone());
        Self {
            deps,
            timings,
            event_tx,
            running: Mutex::new(Running {
                client,
                handle: Some(handle),
            }),
            restarts: AtomicU64::new(0),
        }
    }

    async fn client(&self) -> AgentClient {
        self.running.lock().await.client.clone()
    }

    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Drops the current agent, mid-request if need be, and spawns another.
    pub async fn restart(&self) {
        let mut running = self.running.lock().await;
        if let Some(handle) = running.handle.take() {
            handle.abort();
        }
        let (client, handle) = spawn_agent(self.deps.clone(), self.timings, self.event_tx.clone());
        running.client = client;
        running.handle = Some(handle);
        let count = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
        info!("background agent respawned (restart #{count})");
    }

    pub async fn shutdown(&self) {
        let handle = self.running.lock().await.handle.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.shutdown().await {
                error!("background agent did not stop cleanly: {err:#}");
            }
        }
    }

    async fn observe<T>(&self, result: AgentResult<T>) -> AgentResult<T> {
        if let Err(err @ (AgentError::Unavailable(_) | AgentError::Timeout { .. })) = &result {
            warn!("background agent unresponsive ({err}); respawning");
            self.restart().await;
        }
        result
    }
}

#[async_trait]
impl BackgroundScheduler for SupervisedAgent {
    async fn initialize(&self) -> AgentResult<BackgroundAgentState> {
        let result = self.client().await.initialize().await;
        self.observe(result).await
    }

    async fn sync_alarms(&self, alarms: &[Alarm]) -> AgentResult<SyncReport> {
        let result = self.client().await.sync_alarms(alarms).await;
        self.observe(result).await
    }

    async fn schedule_one(&self, alarm: &Alarm) -> AgentResult<()> {
        let result = self.client().await.schedule_one(alarm).await;
        self.observe(result).await
    }

    async fn cancel_one(&self, alarm_id: &str) -> AgentResult<bool> {
        let result = self.client().await.cancel_one(alarm_id).await;
        self.observe(result).await
    }

    async fn request_notification_permission(&self) -> AgentResult<NotificationPermission> {
        let result = self.client().await.request_notification_permission().await;
        self.observe(result).await
    }

    async fn health_check(&self) -> AgentResult<BackgroundAgentState> {
        let result = self.client().await.health_check().await;
        self.observe(result).await
    }

    fn on_triggered(&self) -> broadcast::Receiver<TriggeredEvent> {
        self.event_tx.subscribe()
    }
}
