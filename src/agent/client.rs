use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::agent::protocol::{AgentCommand, AgentReply, AgentRequest, AgentResponse};
use crate::agent::BackgroundScheduler;
use crate::error::{AgentError, AgentResult};
use crate::models::{
    Alarm, BackgroundAgentState, NotificationPermission, ScheduledAlarm, SyncReport,
    TriggeredEvent,
};

/// Foreground side of the agent channel. Cheap to clone.
#[derive(Clone)]
pub struct AgentClient {
    request_tx: mpsc::Sender<AgentRequest>,
    event_tx: broadcast::Sender<TriggeredEvent>,
    next_correlation_id: Arc<AtomicU64>,
    request_timeout: Duration,
}

impl AgentClient {
    pub(crate) fn new(
        request_tx: mpsc::Sender<AgentRequest>,
        event_tx: broadcast::Sender<TriggeredEvent>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            request_tx,
            event_tx,
            next_correlation_id: Arc::new(AtomicU64::new(1)),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Sends one command and waits for its reply, bounded by the request
    /// timeout. A reply for another request is treated as a broken channel.
    async fn call(&self, command: AgentCommand) -> AgentResult<AgentReply> {
        let operation = command.name();
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        let exchange = async {
            self.request_tx
                .send(AgentRequest {
                    correlation_id,
                    command,
                    reply_tx,
                })
                .await
                .map_err(|_| AgentError::Unavailable("agent request channel closed".into()))?;
            reply_rx.await.map_err(|_| {
                AgentError::Unavailable(format!("agent dropped {operation} without replying"))
            })
        };

        let response: AgentResponse = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| AgentError::timeout(operation, self.request_timeout))??;

        if response.correlation_id != correlation_id {
            return Err(AgentError::Unavailable(format!(
                "reply {} does not match {operation} request {correlation_id}",
                response.correlation_id
            )));
        }
        response.result
    }
}

fn unexpected(operation: &str, reply: AgentReply) -> AgentError {
    AgentError::Unavailable(format!("unexpected reply to {operation}: {reply:?}"))
}

#[async_trait]
impl BackgroundScheduler for AgentClient {
    async fn initialize(&self) -> AgentResult<BackgroundAgentState> {
        match self.call(AgentCommand::Initialize).await? {
            AgentReply::State(state) => Ok(state),
            other => Err(unexpected("initialize", other)),
        }
    }

    async fn sync_alarms(&self, alarms: &[Alarm]) -> AgentResult<SyncReport> {
        let scheduled = alarms.iter().map(ScheduledAlarm::from).collect();
        match self.call(AgentCommand::SyncAlarms(scheduled)).await? {
            AgentReply::Synced(report) => Ok(report),
            other => Err(unexpected("syncAlarms", other)),
        }
    }

    async fn schedule_one(&self, alarm: &Alarm) -> AgentResult<()> {
        match self
            .call(AgentCommand::ScheduleOne(ScheduledAlarm::from(alarm)))
            .await?
        {
            AgentReply::Scheduled => Ok(()),
            other => Err(unexpected("scheduleOne", other)),
        }
    }

    async fn cancel_one(&self, alarm_id: &str) -> AgentResult<bool> {
        match self.call(AgentCommand::CancelOne(alarm_id.to_string())).await? {
            AgentReply::Cancelled { removed } => Ok(removed),
            other => Err(unexpected("cancelOne", other)),
        }
    }

    async fn request_notification_permission(&self) -> AgentResult<NotificationPermission> {
        match self.call(AgentCommand::RequestPermission).await? {
            AgentReply::Permission(permission) => Ok(permission),
            other => Err(unexpected("requestNotificationPermission", other)),
        }
    }

    async fn health_check(&self) -> AgentResult<BackgroundAgentState> {
        match self.call(AgentCommand::HealthCheck).await? {
            AgentReply::State(state) => Ok(state),
            other => Err(unexpected("healthCheck", other)),
        }
    }

    fn on_triggered(&self) -> broadcast::Receiver<TriggeredEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(timeout: Duration) -> (AgentClient, mpsc::Receiver<AgentRequest>) {
        let (request_tx, request_rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(4);
        (AgentClient::new(request_tx, event_tx, timeout), request_rx)
    }

    #[tokio::test]
    async fn silent_agent_times_out() {
        let (client, _request_rx) = client(Duration::from_millis(50));
        let err = client.health_check().await.unwrap_err();
        assert_eq!(
            err,
            AgentError::Timeout {
                operation: "healthCheck".into(),
                after_ms: 50
            }
        );
    }

    #[tokio::test]
    async fn closed_channel_is_unavailable() {
        let (client, request_rx) = client(Duration::from_millis(50));
        drop(request_rx);
        let err = client.initialize().await.unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(_)));
    }

    #[tokio::test]
    async fn mismatched_correlation_id_is_rejected() {
        let (client, mut request_rx) = client(Duration::from_secs(1));
        tokio::spawn(async move {
            if let Some(request) = request_rx.recv().await {
                let _ = request.reply_tx.send(AgentResponse {
                    correlation_id: request.correlation_id + 100,
                    result: Ok(AgentReply::Scheduled),
                });
            }
        });
        let err = client.cancel_one("a").await.unwrap_err();
        assert!(matches!(err, AgentError::Unavailable(msg) if msg.contains("does not match")));
    }

    #[tokio::test]
    async fn errors_cross_the_channel_as_values() {
        let (client, mut request_rx) = client(Duration::from_secs(1));
        tokio::spawn(async move {
            if let Some(request) = request_rx.recv().await {
                let _ = request.reply_tx.send(AgentResponse {
                    correlation_id: request.correlation_id,
                    result: Err(AgentError::NotInitialized),
                });
            }
        });
        assert_eq!(client.sync_alarms(&[]).await, Err(AgentError::NotInitialized));
    }
}
