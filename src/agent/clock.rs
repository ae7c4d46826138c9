use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Wall-clock source for the agent. Alarms are local times; health-check
/// stamps are UTC.
pub trait Clock: Send + Sync {
    fn now_local(&self) -> NaiveDateTime;
    fn now_utc(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
