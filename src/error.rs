//! Error types that cross a component boundary.
//!
//! Plumbing inside a component uses `anyhow`; what the foreground sees from the
//! agent or the registry is one of these.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Failure returned over the agent's message channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum AgentError {
    /// Agent could not start; fatal until `initialize` is retried.
    #[error("agent initialization failed: {0}")]
    InitializationFailure(String),

    /// A command arrived before a successful `initialize`.
    #[error("agent is not initialized")]
    NotInitialized,

    /// Notifications are blocked; alarms degrade to tone/foreground alerting.
    #[error("notification permission denied")]
    PermissionDenied,

    /// Nothing could be written; partial failures come back in `SyncReport`.
    #[error("schedule sync failed: {0}")]
    SyncFailure(String),

    #[error("trigger delivery failed: {0}")]
    TriggerDeliveryFailure(String),

    /// No reply within the bounded interval; the agent may have been evicted.
    #[error("agent did not answer {operation} within {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The agent's channel is closed.
    #[error("agent unavailable: {0}")]
    Unavailable(String),
}

impl AgentError {
    pub fn timeout(operation: &str, after: Duration) -> Self {
        AgentError::Timeout {
            operation: operation.to_string(),
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether the caller should re-run `initialize` before retrying.
    pub fn needs_reinitialize(&self) -> bool {
        matches!(
            self,
            AgentError::NotInitialized | AgentError::InitializationFailure(_)
        )
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("alarm {0} not found")]
    NotFound(String),

    #[error("wake window must be 0 or between 10 and 60 minutes, got {0}")]
    InvalidWakeWindow(u32),

    #[error("repeat day index {0} is out of range (0 = Monday .. 6 = Sunday)")]
    InvalidRepeatDay(u8),

    #[error("alarm label must not be longer than {max} characters")]
    LabelTooLong { max: usize },

    #[error("sleep record must end after it starts and last at most 24 hours")]
    InvalidSleepRecord,

    #[error("malformed alarm edit: {0}")]
    MalformedEdit(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
