//! Alarm definitions owned by the foreground registry.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MINUTES_PER_DAY: i32 = 24 * 60;
pub const MIN_WAKE_WINDOW_MINUTES: u32 = 10;
pub const MAX_WAKE_WINDOW_MINUTES: u32 = 60;

/// Local wall-clock time of day with minute precision, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmTime {
    hour: u8,
    minute: u8,
}

impl AlarmTime {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Wraps any signed minute offset onto the 24h clock.
    pub fn from_minutes(minutes: i32) -> Self {
        let wrapped = minutes.rem_euclid(MINUTES_PER_DAY);
        Self {
            hour: (wrapped / 60) as u8,
            minute: (wrapped % 60) as u8,
        }
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(&self) -> i32 {
        i32::from(self.hour) * 60 + i32::from(self.minute)
    }

    pub fn to_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
            .unwrap_or(NaiveTime::MIN)
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// Signed minutes from `self` forward/backward to `other`, taking the
    /// shorter way around midnight.
    pub fn signed_distance_to(&self, other: &AlarmTime) -> i32 {
        let raw = other.minutes_since_midnight() - self.minutes_since_midnight();
        let wrapped = raw.rem_euclid(MINUTES_PER_DAY);
        if wrapped > MINUTES_PER_DAY / 2 {
            wrapped - MINUTES_PER_DAY
        } else {
            wrapped
        }
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid alarm time '{0}', expected HH:MM")]
pub struct ParseAlarmTimeError(pub String);

impl FromStr for AlarmTime {
    type Err = ParseAlarmTimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseAlarmTimeError(value.to_string());
        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        AlarmTime::new(hour, minute).ok_or_else(invalid)
    }
}

impl Serialize for AlarmTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AlarmTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Days of the week an alarm repeats on, stored Monday = 0 .. Sunday = 6.
/// An empty set is a one-shot alarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepeatDays(BTreeSet<u8>);

impl RepeatDays {
    pub fn once() -> Self {
        Self::default()
    }

    pub fn every_day() -> Self {
        Self((0..7).collect())
    }

    pub fn weekdays() -> Self {
        Self((0..5).collect())
    }

    pub fn from_weekdays<I: IntoIterator<Item = Weekday>>(days: I) -> Self {
        Self(
            days.into_iter()
                .map(|day| day.num_days_from_monday() as u8)
                .collect(),
        )
    }

    pub fn is_one_shot(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0.contains(&(day.num_days_from_monday() as u8))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rejects day indexes outside Monday..Sunday (possible after deserializing).
    pub fn validate(&self) -> Result<(), u8> {
        match self.0.iter().find(|day| **day > 6) {
            Some(day) => Err(*day),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartSettings {
    pub smart_enabled: bool,
    pub adaptive_enabled: bool,
    /// 0 disables adjustment, otherwise 10..=60.
    pub wake_window_minutes: u32,
    pub consistency_priority: bool,
    pub seasonal_adjustment: bool,
}

impl Default for SmartSettings {
    fn default() -> Self {
        Self {
            smart_enabled: false,
            adaptive_enabled: false,
            wake_window_minutes: 30,
            consistency_priority: false,
            seasonal_adjustment: false,
        }
    }
}

impl SmartSettings {
    pub fn wake_window_is_valid(&self) -> bool {
        self.wake_window_minutes == 0
            || (MIN_WAKE_WINDOW_MINUTES..=MAX_WAKE_WINDOW_MINUTES)
                .contains(&self.wake_window_minutes)
    }
}

/// Optimizer output attached to an alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartSchedule {
    pub original_time: AlarmTime,
    pub suggested_time: AlarmTime,
    /// 0.0..=1.0
    pub confidence: f64,
    pub rationale: String,
}

impl SmartSchedule {
    pub fn unchanged(time: AlarmTime, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            original_time: time,
            suggested_time: time,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: rationale.into(),
        }
    }

    pub fn minutes_moved_earlier(&self) -> i32 {
        -self.original_time.signed_distance_to(&self.suggested_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: String,
    pub label: String,
    pub time: AlarmTime,
    pub repeat_days: RepeatDays,
    pub enabled: bool,
    pub smart: SmartSettings,
    pub smart_schedule: Option<SmartSchedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alarm {
    /// The time the background agent should actually fire at.
    pub fn trigger_time(&self) -> AlarmTime {
        match (&self.smart_schedule, self.smart.smart_enabled) {
            (Some(schedule), true) if schedule.original_time == self.time => {
                schedule.suggested_time
            }
            _ => self.time,
        }
    }

    /// True when `other` would be scheduled differently by the agent.
    pub fn schedule_differs(&self, other: &Alarm) -> bool {
        self.enabled != other.enabled
            || self.trigger_time() != other.trigger_time()
            || self.repeat_days != other.repeat_days
    }
}

/// Fields the app shell supplies when creating an alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmDraft {
    pub label: String,
    pub time: AlarmTime,
    #[serde(default)]
    pub repeat_days: RepeatDays,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub smart: SmartSettings,
}

fn default_enabled() -> bool {
    true
}

impl AlarmDraft {
    pub fn new(label: impl Into<String>, time: AlarmTime) -> Self {
        Self {
            label: label.into(),
            time,
            repeat_days: RepeatDays::once(),
            enabled: true,
            smart: SmartSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_hh_mm() {
        let time: AlarmTime = "07:05".parse().unwrap();
        assert_eq!(time.hour(), 7);
        assert_eq!(time.minute(), 5);
        assert_eq!(time.to_string(), "07:05");
        assert_eq!("6:30".parse::<AlarmTime>().unwrap().to_string(), "06:30");
    }

    #[test]
    fn rejects_malformed_times() {
        for raw in ["24:00", "07:60", "0700", "7:5", "", "ab:cd", "123:00"] {
            assert!(raw.parse::<AlarmTime>().is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn wraps_minutes_around_midnight() {
        assert_eq!(AlarmTime::from_minutes(-30).to_string(), "23:30");
        assert_eq!(AlarmTime::from_minutes(MINUTES_PER_DAY + 15).to_string(), "00:15");
    }

    #[test]
    fn signed_distance_takes_short_way() {
        let late = AlarmTime::new(23, 50).unwrap();
        let early = AlarmTime::new(0, 10).unwrap();
        assert_eq!(late.signed_distance_to(&early), 20);
        assert_eq!(early.signed_distance_to(&late), -20);
    }

    #[test]
    fn serializes_time_as_string() {
        let json = serde_json::to_string(&AlarmTime::new(6, 45).unwrap()).unwrap();
        assert_eq!(json, "\"06:45\"");
    }

    #[test]
    fn repeat_days_track_weekdays() {
        let days = RepeatDays::from_weekdays([Weekday::Mon, Weekday::Sat]);
        assert!(days.contains(Weekday::Mon));
        assert!(days.contains(Weekday::Sat));
        assert!(!days.contains(Weekday::Sun));
        assert!(!days.is_one_shot());
        assert!(RepeatDays::once().is_one_shot());
    }

    #[test]
    fn wake_window_bounds() {
        let mut smart = SmartSettings::default();
        for (window, valid) in [(0, true), (5, false), (10, true), (60, true), (61, false)] {
            smart.wake_window_minutes = window;
            assert_eq!(smart.wake_window_is_valid(), valid, "window {window}");
        }
    }
}
