//! Sleep goal, recorded sleep history and the analyzer's derived report.

use chrono::{Datelike, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use super::alarm::AlarmTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepGoal {
    pub target_bedtime: AlarmTime,
    pub target_wake_time: AlarmTime,
    pub target_duration_minutes: u32,
    pub consistency: bool,
    pub weekend_variation_minutes: u32,
    pub adapt_to_lifestyle: bool,
}

impl Default for SleepGoal {
    fn default() -> Self {
        Self {
            target_bedtime: AlarmTime::from_minutes(23 * 60),
            target_wake_time: AlarmTime::from_minutes(7 * 60),
            target_duration_minutes: 8 * 60,
            consistency: true,
            weekend_variation_minutes: 60,
            adapt_to_lifestyle: false,
        }
    }
}

/// Longest stretch that still counts as one night.
pub const MAX_NIGHT_MINUTES: i64 = 24 * 60;

/// One recorded night, in local wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepRecord {
    pub id: String,
    pub bed_at: NaiveDateTime,
    pub wake_at: NaiveDateTime,
}

impl SleepRecord {
    pub fn new(bed_at: NaiveDateTime, wake_at: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bed_at,
            wake_at,
        }
    }

    /// Ends after it starts and fits in a day.
    pub fn is_plausible(&self) -> bool {
        self.wake_at > self.bed_at
            && (self.wake_at - self.bed_at).num_minutes() <= MAX_NIGHT_MINUTES
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.wake_at - self.bed_at).num_minutes().max(0)
    }

    pub fn wake_time(&self) -> AlarmTime {
        AlarmTime::from_naive_time(self.wake_at.time())
    }

    pub fn bed_time(&self) -> AlarmTime {
        AlarmTime::from_naive_time(self.bed_at.time())
    }

    pub fn woke_on_weekend(&self) -> bool {
        matches!(self.wake_at.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecommendation {
    pub description: String,
    pub impact: Impact,
    pub expected_improvement: String,
    /// Negative = earlier.
    pub time_adjustment_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserScheduleAnalysis {
    pub sleep_debt_minutes: u32,
    pub sleep_consistency_percent: f64,
    pub average_sleep_duration_minutes: u32,
    pub chronotype_alignment_percent: f64,
    pub recommendations: Vec<ScheduleRecommendation>,
    pub nights_analyzed: usize,
    pub median_wake_time: AlarmTime,
    pub median_bed_time: AlarmTime,
    pub wake_time_std_dev_minutes: f64,
}

/// Analyzer result. Too little history is its own state, never a zero score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ScheduleAnalysis {
    #[serde(rename_all = "camelCase")]
    InsufficientData {
        nights_recorded: usize,
        nights_required: usize,
    },
    Ready(UserScheduleAnalysis),
}

impl ScheduleAnalysis {
    pub fn report(&self) -> Option<&UserScheduleAnalysis> {
        match self {
            ScheduleAnalysis::Ready(report) => Some(report),
            ScheduleAnalysis::InsufficientData { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, ScheduleAnalysis::InsufficientData { .. })
    }
}
