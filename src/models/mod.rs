pub mod agent;
pub mod alarm;
pub mod sleep;

pub use agent::{
    BackgroundAgentState, DeliveryPath, NotificationPermission, ScheduledAlarm, SyncFailureEntry,
    SyncReport, TriggeredEvent,
};
pub use alarm::{
    Alarm, AlarmDraft, AlarmTime, ParseAlarmTimeError, RepeatDays, SmartSchedule, SmartSettings,
    MAX_WAKE_WINDOW_MINUTES, MINUTES_PER_DAY, MIN_WAKE_WINDOW_MINUTES,
};
pub use sleep::{
    Impact, ScheduleAnalysis, ScheduleRecommendation, SleepGoal, SleepRecord, UserScheduleAnalysis,
    MAX_NIGHT_MINUTES,
};
