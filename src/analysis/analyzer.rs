use chrono::Duration;

use crate::analysis::config::AnalyzerConfig;
use crate::analysis::recommendations::build_recommendations;
use crate::models::{AlarmTime, ScheduleAnalysis, SleepGoal, SleepRecord, UserScheduleAnalysis};

/// Times of day as signed offsets from a reference, so a set of wake times
/// straddling midnight still has a sensible median and spread.
#[derive(Debug, Clone)]
pub(crate) struct TimeSpread {
    pub median: AlarmTime,
    pub std_dev_minutes: f64,
    pub variance: f64,
}

pub(crate) fn time_spread(times: &[AlarmTime]) -> Option<TimeSpread> {
    let reference = *times.first()?;
    let mut offsets: Vec<i32> = times
        .iter()
        .map(|time| reference.signed_distance_to(time))
        .collect();
    offsets.sort_unstable();

    let median_offset = median_i32(&offsets);
    let mean = offsets.iter().map(|v| f64::from(*v)).sum::<f64>() / offsets.len() as f64;
    let variance = offsets
        .iter()
        .map(|v| (f64::from(*v) - mean).powi(2))
        .sum::<f64>()
        / offsets.len() as f64;

    Some(TimeSpread {
        median: AlarmTime::from_minutes(reference.minutes_since_midnight() + median_offset),
        std_dev_minutes: variance.sqrt(),
        variance,
    })
}

fn median_i32(sorted: &[i32]) -> i32 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        // Floor of the mean keeps the median on a whole minute.
        (sorted[mid - 1] + sorted[mid]).div_euclid(2)
    } else {
        sorted[mid]
    }
}

/// Derives sleep metrics from recorded nights. Pure; no side effects.
#[derive(Debug, Clone, Default)]
pub struct ScheduleAnalyzer {
    config: AnalyzerConfig,
}

impl ScheduleAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn analyze(&self, history: &[SleepRecord], goal: &SleepGoal) -> ScheduleAnalysis {
        let nights = self.window(history);

        if nights.len() < self.config.min_nights {
            return ScheduleAnalysis::InsufficientData {
                nights_recorded: nights.len(),
                nights_required: self.config.min_nights,
            };
        }

        if nights.is_empty() {
            return ScheduleAnalysis::InsufficientData {
                nights_recorded: 0,
                nights_required: self.config.min_nights,
            };
        }

        let durations: Vec<i64> = nights.iter().map(|night| night.duration_minutes()).collect();
        let average_duration = durations.iter().sum::<i64>() / durations.len() as i64;

        let target = i64::from(goal.target_duration_minutes);
        let sleep_debt: i64 = durations
            .iter()
            .rev()
            .take(self.config.debt_window_nights)
            .map(|actual| (target - actual).max(0))
            .sum();

        let wake_times: Vec<AlarmTime> = nights.iter().map(|night| night.wake_time()).collect();
        let bed_times: Vec<AlarmTime> = nights.iter().map(|night| night.bed_time()).collect();
        // Both are non-empty past the emptiness check.
        let (Some(wake), Some(bed)) = (time_spread(&wake_times), time_spread(&bed_times)) else {
            return ScheduleAnalysis::InsufficientData {
                nights_recorded: nights.len(),
                nights_required: self.config.min_nights,
            };
        };

        let consistency =
            100.0 / (1.0 + wake.variance / self.config.consistency_variance_scale);

        let distance = f64::from(wake.median.signed_distance_to(&goal.target_wake_time).abs());
        let closeness = (1.0 - distance / self.config.alignment_zero_at_minutes).max(0.0) * 100.0;
        let alignment = (closeness - 0.5 * wake.std_dev_minutes).clamp(0.0, 100.0);

        let mut report = UserScheduleAnalysis {
            sleep_debt_minutes: u32::try_from(sleep_debt).unwrap_or(u32::MAX),
            sleep_consistency_percent: round_one_decimal(consistency),
            average_sleep_duration_minutes: u32::try_from(average_duration.max(0))
                .unwrap_or(u32::MAX),
            chronotype_alignment_percent: round_one_decimal(alignment),
            recommendations: Vec::new(),
            nights_analyzed: nights.len(),
            median_wake_time: wake.median,
            median_bed_time: bed.median,
            wake_time_std_dev_minutes: round_one_decimal(wake.std_dev_minutes),
        };
        report.recommendations = build_recommendations(&report, goal, &nights);

        ScheduleAnalysis::Ready(report)
    }

    /// Valid nights inside the configured window, oldest first.
    fn window(&self, history: &[SleepRecord]) -> Vec<SleepRecord> {
        let mut nights: Vec<SleepRecord> = history
            .iter()
            .filter(|night| night.is_plausible())
            .cloned()
            .collect();
        nights.sort_by_key(|night| night.wake_at);

        let Some(latest) = nights.last().map(|night| night.wake_at) else {
            return nights;
        };
        let cutoff = latest - Duration::days(i64::from(self.config.window_days));
        nights.retain(|night| night.wake_at > cutoff);
        nights
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
