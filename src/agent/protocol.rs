//! Messages between the foreground and the agent task.

use tokio::sync::oneshot;

use crate::error::AgentResult;
use crate::models::{BackgroundAgentState, NotificationPermission, ScheduledAlarm, SyncReport};

#[derive(Debug, Clone)]
pub(crate) enum AgentCommand {
    Initialize,
    SyncAlarms(Vec<ScheduledAlarm>),
    ScheduleOne(ScheduledAlarm),
    CancelOne(String),
    RequestPermission,
    HealthCheck,
}

impl AgentCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            AgentCommand::Initialize => "initialize",
            AgentCommand::SyncAlarms(_) => "syncAlarms",
            AgentCommand::ScheduleOne(_) => "scheduleOne",
            AgentCommand::CancelOne(_) => "cancelOne",
            AgentCommand::RequestPermission => "requestNotificationPermission",
            AgentCommand::HealthCheck => "healthCheck",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AgentReply {
    State(BackgroundAgentState),
    Synced(SyncReport),
    Scheduled,
    Cancelled { removed: bool },
    Permission(NotificationPermission),
}

pub(crate) struct AgentRequest {
    pub correlation_id: u64,
    pub command: AgentCommand,
    pub reply_tx: oneshot::Sender<AgentResponse>,
}

#[derive(Debug)]
pub(crate) struct AgentResponse {
    pub correlation_id: u64,
    pub result: AgentResult<AgentReply>,
}
