//! Background scheduler: a task that owns the durable schedule and fires
//! alarms whatever the foreground is doing. The foreground talks to it only
//! through [`BackgroundScheduler`].

pub mod client;
pub mod clock;
pub mod notifier;
mod protocol;
pub mod store;
pub mod supervisor;
pub mod trigger;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AgentResult;
use crate::models::{
    Alarm, BackgroundAgentState, NotificationPermission, SyncReport, TriggeredEvent,
};
use crate::settings::SchedulerSettings;

pub use client::AgentClient;
pub use clock::{Clock, SystemClock};
pub use notifier::{DesktopNotifier, Notifier, ToneFallback};
pub use store::{MemoryScheduleStore, ScheduleStore, SqliteScheduleStore};
pub use supervisor::SupervisedAgent;

use worker::AgentWorker;

const REQUEST_CHANNEL_CAPACITY: usize = 32;
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Control surface of a background scheduler. The registry and the
/// reconciler only ever see this trait.
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Loads the persisted schedule and checks notification permission.
    async fn initialize(&self) -> AgentResult<BackgroundAgentState>;

    /// Replaces the durable schedule with the enabled subset of `alarms`.
    async fn sync_alarms(&self, alarms: &[Alarm]) -> AgentResult<SyncReport>;

    async fn schedule_one(&self, alarm: &Alarm) -> AgentResult<()>;

    /// `Ok(false)` when nothing was scheduled under `alarm_id`.
    async fn cancel_one(&self, alarm_id: &str) -> AgentResult<bool>;

    async fn request_notification_permission(&self) -> AgentResult<NotificationPermission>;

    async fn health_check(&self) -> AgentResult<BackgroundAgentState>;

    fn on_triggered(&self) -> broadcast::Receiver<TriggeredEvent>;
}

/// Everything the agent task owns besides its channels.
#[derive(Clone)]
pub struct AgentDeps {
    pub store: Arc<dyn ScheduleStore>,
    pub notifier: Arc<dyn Notifier>,
    pub tone: Arc<dyn ToneFallback>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentTimings {
    pub poll_interval: Duration,
    pub missed_alarm_grace: Duration,
    pub request_timeout: Duration,
    pub notify_timeout: Duration,
}

impl From<&SchedulerSettings> for AgentTimings {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            missed_alarm_grace: settings.missed_alarm_grace(),
            request_timeout: settings.request_timeout(),
            notify_timeout: settings.notify_timeout(),
        }
    }
}

/// Owns the running agent task.
pub struct AgentHandle {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl AgentHandle {
    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        self.handle.await.context("agent task failed to join")
    }

    /// Stops the task without waiting, even mid-request.
    pub fn abort(self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns an agent over `deps`. It starts uninitialized; every command but
/// `initialize` is refused until that succeeds.
pub fn spawn_agent(
    deps: AgentDeps,
    timings: AgentTimings,
    event_tx: broadcast::Sender<TriggeredEvent>,
) -> (AgentClient, AgentHandle) {
    let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let client = AgentClient::new(request_tx, event_tx.clone(), timings.request_timeout);

    let cancel_token = CancellationToken::new();
    let worker = AgentWorker::new(deps, timings, request_rx, event_tx);
    let handle = tokio::spawn(worker.run(cancel_token.clone()));

    (
        client,
        AgentHandle {
            cancel_token,
            handle,
        },
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::Duration as ChronoDuration;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::db::{Database, Schema};
    use crate::error::AgentError;
    use crate::models::{DeliveryPath, RepeatDays};
    use crate::test_utils::{
        alarm, dt, FlakyStore, ManualClock, RecordingNotifier, SilentTone,
    };

    struct Rig {
        client: AgentClient,
        handle: AgentHandle,
        clock: Arc<ManualClock>,
        store: Arc<FlakyStore>,
        notifier: Arc<RecordingNotifier>,
        tone: Arc<SilentTone>,
    }

    fn timings() -> AgentTimings {
        AgentTimings {
            poll_interval: Duration::from_millis(10),
            missed_alarm_grace: Duration::from_secs(600),
            request_timeout: Duration::from_secs(2),
            notify_timeout: Duration::from_millis(100),
        }
    }

    fn rig_with(store: Arc<FlakyStore>, notifier: RecordingNotifier) -> Rig {
        let clock = Arc::new(ManualClock::new(dt(1, 6, 59, 0)));
        let notifier = Arc::new(notifier);
        let tone = Arc::new(SilentTone::default());
        let deps = AgentDeps {
            store: store.clone(),
            notifier: notifier.clone(),
            tone: tone.clone(),
            clock: clock.clone(),
        };
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (client, handle) = spawn_agent(deps, timings(), event_tx);
        Rig {
            client,
            handle,
            clock,
            store,
            notifier,
            tone,
        }
    }

    fn rig() -> Rig {
        rig_with(
            Arc::new(FlakyStore::default()),
            RecordingNotifier::granting(),
        )
    }

    fn five_alarms() -> Vec<Alarm> {
        (1..=5)
            .map(|n| alarm(&format!("a{n}"), &format!("0{n}:30"), RepeatDays::weekdays(), true))
            .collect()
    }

    async fn next_event(rx: &mut broadcast::Receiver<TriggeredEvent>) -> TriggeredEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event in time")
            .expect("event channel open")
    }

    #[tokio::test]
    async fn commands_before_initialize_are_refused() {
        let rig = rig();
        assert_eq!(
            rig.client.sync_alarms(&five_alarms()).await,
            Err(AgentError::NotInitialized)
        );
        assert_eq!(
            rig.client.health_check().await,
            Err(AgentError::NotInitialized)
        );
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_requests_permission_once() {
        let rig = rig();
        let state = rig.client.initialize().await.unwrap();
        assert!(state.initialized);
        assert_eq!(state.notification_permission, NotificationPermission::Granted);
        assert_eq!(state.scheduled_alarm_count, 0);

        rig.client.initialize().await.unwrap();
        assert_eq!(rig.notifier.permission_requests(), 1);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn scheduled_count_matches_enabled_alarms() {
        let rig = rig();
        rig.client.initialize().await.unwrap();

        let mut alarms = five_alarms();
        alarms[1].enabled = false;
        alarms[3].enabled = false;

        let report = rig.client.sync_alarms(&alarms).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.scheduled_alarm_count, 3);

        let state = rig.client.health_check().await.unwrap();
        assert_eq!(state.scheduled_alarm_count, 3);
        assert!(state.last_health_check_at.is_some());
        assert_eq!(state.next_trigger_at, Some(dt(2, 1, 30, 0)));
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn syncing_the_same_set_twice_is_idempotent() {
        let rig = rig();
        rig.client.initialize().await.unwrap();
        let alarms = five_alarms();

        rig.client.sync_alarms(&alarms).await.unwrap();
        let first = rig.store.snapshot();

        rig.clock.advance(ChronoDuration::minutes(5));
        let report = rig.client.sync_alarms(&alarms).await.unwrap();
        assert!(report.scheduled.is_empty());
        assert_eq!(report.unchanged.len(), 5);
        assert_eq!(rig.store.snapshot(), first);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn one_failed_write_is_reported_by_name() {
        let rig = rig();
        rig.client.initialize().await.unwrap();
        rig.store.fail_writes_for("a3");

        let report = rig.client.sync_alarms(&five_alarms()).await.unwrap();
        assert_eq!(report.scheduled.len(), 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].alarm_id, "a3");
        assert!(!report.is_complete());

        let state = rig.client.health_check().await.unwrap();
        assert_eq!(state.scheduled_alarm_count, 4);
        assert!(state.last_error.unwrap_or_default().contains("a3"));

        let persisted: HashSet<String> = rig
            .store
            .entry_ids()
            .into_iter()
            .collect();
        let expected: HashSet<String> =
            ["a1", "a2", "a4", "a5"].iter().map(|id| id.to_string()).collect();
        assert_eq!(persisted, expected);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn nothing_written_is_a_sync_failure() {
        let rig = rig();
        rig.client.initialize().await.unwrap();
        rig.store.fail_all_writes();

        let err = rig.client.sync_alarms(&five_alarms()[..2]).await.unwrap_err();
        assert!(matches!(err, AgentError::SyncFailure(msg) if msg.contains("a1")));
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn removed_alarms_leave_the_store() {
        let rig = rig();
        rig.client.initialize().await.unwrap();
        let alarms = five_alarms();
        rig.client.sync_alarms(&alarms).await.unwrap();

        let report = rig.client.sync_alarms(&alarms[..2]).await.unwrap();
        assert_eq!(report.removed, vec!["a3", "a4", "a5"]);
        assert_eq!(rig.store.entry_ids(), vec!["a1", "a2"]);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn schedule_and_cancel_single_alarms() {
        let rig = rig();
        rig.client.initialize().await.unwrap();

        let single = alarm("solo", "06:00", RepeatDays::every_day(), true);
        rig.client.schedule_one(&single).await.unwrap();
        assert_eq!(rig.client.health_check().await.unwrap().scheduled_alarm_count, 1);

        assert!(rig.client.cancel_one("solo").await.unwrap());
        assert!(!rig.client.cancel_one("solo").await.unwrap());

        let mut disabled = single.clone();
        disabled.enabled = false;
        rig.client.schedule_one(&single).await.unwrap();
        rig.client.schedule_one(&disabled).await.unwrap();
        assert_eq!(rig.client.health_check().await.unwrap().scheduled_alarm_count, 0);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn restart_reloads_persisted_schedule() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(dir.path().join("schedule.sqlite3"), Schema::Schedule).unwrap();
        let clock = Arc::new(ManualClock::new(dt(1, 12, 0, 0)));
        let deps = AgentDeps {
            store: Arc::new(SqliteScheduleStore::new(db.clone())),
            notifier: Arc::new(RecordingNotifier::granting()),
            tone: Arc::new(SilentTone::default()),
            clock,
        };

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (client, handle) = spawn_agent(deps.clone(), timings(), event_tx.clone());
        client.initialize().await.unwrap();
        client.sync_alarms(&five_alarms()[..3]).await.unwrap();
        handle.shutdown().await.unwrap();

        let (client, handle) = spawn_agent(deps, timings(), event_tx);
        assert_eq!(client.health_check().await, Err(AgentError::NotInitialized));
        let state = client.initialize().await.unwrap();
        assert_eq!(state.scheduled_alarm_count, 3);
        assert_eq!(client.health_check().await.unwrap().scheduled_alarm_count, 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_store_fails_initialization() {
        let store = Arc::new(FlakyStore::default());
        store.fail_loads();
        let rig = rig_with(store, RecordingNotifier::granting());

        let err = rig.client.initialize().await.unwrap_err();
        assert!(matches!(err, AgentError::InitializationFailure(_)));
        assert!(err.needs_reinitialize());
        assert_eq!(
            rig.client.sync_alarms(&[]).await,
            Err(AgentError::NotInitialized)
        );
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn fires_notification_and_emits_event() {
        let rig = rig();
        let mut events = rig.client.on_triggered();
        rig.client.initialize().await.unwrap();
        let once = alarm("once", "07:00", RepeatDays::once(), true);
        rig.client.sync_alarms(&[once]).await.unwrap();

        rig.clock.set(dt(1, 7, 0, 5));
        let event = next_event(&mut events).await;
        assert_eq!(event.alarm_id, "once");
        assert_eq!(event.scheduled_for, dt(1, 7, 0, 0));
        assert_eq!(event.delivery, DeliveryPath::Notification);
        assert!(event.one_shot);
        assert_eq!(rig.notifier.sent().len(), 1);

        // A one-shot rings once; the entry stays until the registry drops it.
        rig.clock.set(dt(2, 7, 0, 5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        let state = rig.client.health_check().await.unwrap();
        assert_eq!(state.scheduled_alarm_count, 1);
        assert_eq!(state.next_trigger_at, None);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_notification_falls_back_to_tone_then_bell() {
        let notifier = RecordingNotifier::granting();
        notifier.fail_sends();
        let rig = rig_with(Arc::new(FlakyStore::default()), notifier);
        let mut events = rig.client.on_triggered();
        rig.client.initialize().await.unwrap();
        rig.client
            .sync_alarms(&[alarm("daily", "07:00", RepeatDays::every_day(), true)])
            .await
            .unwrap();

        rig.clock.set(dt(1, 7, 0, 1));
        assert_eq!(next_event(&mut events).await.delivery, DeliveryPath::Tone);
        assert_eq!(rig.tone.plays(), 1);

        rig.tone.fail_plays();
        rig.clock.set(dt(2, 7, 0, 1));
        assert_eq!(next_event(&mut events).await.delivery, DeliveryPath::Bell);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn denied_permission_goes_straight_to_tone() {
        let rig = rig_with(Arc::new(FlakyStore::default()), RecordingNotifier::denying());
        let mut events = rig.client.on_triggered();
        let state = rig.client.initialize().await.unwrap();
        assert_eq!(state.notification_permission, NotificationPermission::Denied);

        rig.client
            .sync_alarms(&[alarm("daily", "07:00", RepeatDays::every_day(), true)])
            .await
            .unwrap();
        rig.clock.set(dt(1, 7, 0, 1));
        assert_eq!(next_event(&mut events).await.delivery, DeliveryPath::Tone);
        assert!(rig.notifier.sent().is_empty());
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn hanging_notifier_falls_back_to_tone() {
        let notifier = RecordingNotifier::granting();
        notifier.hang_sends();
        let rig = rig_with(Arc::new(FlakyStore::default()), notifier);
        let mut events = rig.client.on_triggered();
        rig.client.initialize().await.unwrap();
        rig.client
            .sync_alarms(&[alarm("daily", "07:00", RepeatDays::every_day(), true)])
            .await
            .unwrap();

        rig.clock.set(dt(1, 7, 0, 1));
        assert_eq!(next_event(&mut events).await.delivery, DeliveryPath::Tone);
        assert_eq!(rig.tone.plays(), 1);

        // The agent keeps serving requests and ringing later occurrences.
        let state = rig.client.health_check().await.unwrap();
        assert_eq!(state.next_trigger_at, Some(dt(2, 7, 0, 0)));
        rig.clock.set(dt(2, 7, 0, 1));
        assert_eq!(next_event(&mut events).await.delivery, DeliveryPath::Tone);
        assert_eq!(rig.tone.plays(), 2);
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn occurrence_found_past_grace_is_reported_missed() {
        let rig = rig();
        let mut events = rig.client.on_triggered();
        rig.client.initialize().await.unwrap();
        rig.client
            .sync_alarms(&[alarm("daily", "07:00", RepeatDays::every_day(), true)])
            .await
            .unwrap();

        // Agent "slept" through the alarm by an hour.
        rig.clock.set(dt(1, 8, 0, 0));
        let event = next_event(&mut events).await;
        assert_eq!(event.delivery, DeliveryPath::Missed);
        assert_eq!(event.scheduled_for, dt(1, 7, 0, 0));
        assert!(!event.one_shot);
        assert_eq!(rig.tone.plays(), 0);
        assert!(rig.notifier.sent().is_empty());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        let state = rig.client.health_check().await.unwrap();
        assert_eq!(state.next_trigger_at, Some(dt(2, 7, 0, 0)));
        rig.handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn missed_one_shot_is_reported_once() {
        let rig = rig();
        let mut events = rig.client.on_triggered();
        rig.client.initialize().await.unwrap();
        rig.client
            .sync_alarms(&[alarm("once", "07:00", RepeatDays::once(), true)])
            .await
            .unwrap();

        rig.clock.set(dt(1, 9, 0, 0));
        let event = next_event(&mut events).await;
        assert_eq!(event.alarm_id, "once");
        assert_eq!(event.delivery, DeliveryPath::Missed);
        assert!(event.one_shot);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(rig.client.health_check().await.unwrap().next_trigger_at, None);
        rig.handle.shutdown().await.unwrap();
    }
}
