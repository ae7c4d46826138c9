use chrono::{Datelike, Local, NaiveDate};

use crate::models::{
    Alarm, AlarmTime, ScheduleAnalysis, SleepGoal, SmartSchedule, UserScheduleAnalysis,
    MAX_WAKE_WINDOW_MINUTES, MINUTES_PER_DAY,
};
use crate::optimizer::confidence::compute_confidence;
use crate::optimizer::config::OptimizerConfig;

/// What the optimizer settled on. Offsets are minutes relative to the set
/// time and never positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    CycleBoundary { offset: i32, cycle: i32 },
    MedianWake { offset: i32 },
    ProtectSleep { rejected_offset: i32 },
    NoBoundary,
}

impl Decision {
    fn offset(&self) -> i32 {
        match self {
            Decision::CycleBoundary { offset, .. } | Decision::MedianWake { offset } => *offset,
            Decision::ProtectSleep { .. } | Decision::NoBoundary => 0,
        }
    }

    fn chosen_offset(&self) -> Option<i32> {
        match self {
            Decision::CycleBoundary { offset, .. } | Decision::MedianWake { offset } => {
                Some(*offset)
            }
            Decision::ProtectSleep { .. } | Decision::NoBoundary => None,
        }
    }
}

fn is_winter(date: NaiveDate) -> bool {
    matches!(date.month(), 11 | 12 | 1 | 2)
}

/// Minutes from `from` forward to `to` on the 24h clock.
fn forward_minutes(from: AlarmTime, to: AlarmTime) -> i32 {
    (to.minutes_since_midnight() - from.minutes_since_midnight()).rem_euclid(MINUTES_PER_DAY)
}

/// Latest cycle boundary at or before the set time, as a non-positive
/// offset, if it lands inside the window after at least one full cycle.
fn latest_cycle_boundary(elapsed: i32, window: i32, cycle: i32) -> Option<(i32, i32)> {
    if cycle <= 0 {
        return None;
    }
    let into_cycle = elapsed.rem_euclid(cycle);
    let at_boundary = elapsed - into_cycle;
    if into_cycle <= window && at_boundary >= cycle {
        Some((-into_cycle, at_boundary / cycle))
    } else {
        None
    }
}

fn consistency_phrase(percent: f64) -> String {
    let level = if percent >= 80.0 {
        "high"
    } else if percent >= 50.0 {
        "moderate"
    } else {
        "low"
    };
    format!("{level} wake-time consistency ({percent:.0}%)")
}

/// Moves an alarm earlier, inside its wake window, onto an estimated
/// light-sleep phase.
#[derive(Debug, Clone, Default)]
pub struct WakeTimeOptimizer {
    config: OptimizerConfig,
}

impl WakeTimeOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn suggest_time(
        &self,
        alarm: &Alarm,
        goal: &SleepGoal,
        analysis: &ScheduleAnalysis,
    ) -> SmartSchedule {
        self.suggest_time_on(alarm, goal, analysis, Local::now().date_naive())
    }

    /// Same as [`suggest_time`](Self::suggest_time) with an explicit date for
    /// the seasonal rule.
    pub fn suggest_time_on(
        &self,
        alarm: &Alarm,
        goal: &SleepGoal,
        analysis: &ScheduleAnalysis,
        today: NaiveDate,
    ) -> SmartSchedule {
        let set_time = alarm.time;

        if !alarm.smart.smart_enabled {
            return SmartSchedule::unchanged(set_time, 1.0, "smart scheduling disabled");
        }

        let window = alarm.smart.wake_window_minutes.min(MAX_WAKE_WINDOW_MINUTES) as i32;
        if window == 0 {
            return SmartSchedule::unchanged(set_time, 1.0, "smart scheduling window too narrow");
        }

        let report = match analysis {
            ScheduleAnalysis::Ready(report) => report,
            ScheduleAnalysis::InsufficientData {
                nights_recorded,
                nights_required,
            } => {
                return SmartSchedule::unchanged(
                    set_time,
                    self.config.insufficient_data_confidence,
                    format!(
                        "not enough sleep history yet ({nights_recorded} of {nights_required} nights); keeping {set_time}"
                    ),
                );
            }
        };

        let decision = self.decide(alarm, goal, report, window);
        let winter = alarm.smart.seasonal_adjustment && is_winter(today);

        let mut preferred_offset = -(window / 2);
        if winter {
            preferred_offset -= self.config.seasonal_shift_minutes;
        }
        let preferred_offset = preferred_offset.clamp(-window, 0);

        let (confidence, ..) = compute_confidence(
            report,
            decision.chosen_offset(),
            preferred_offset,
            window,
            &self.config,
        );

        let offset = decision.offset();
        debug_assert!((-window..=0).contains(&offset));

        let mut rationale = vec![
            self.describe(&decision, report, window),
            consistency_phrase(report.sleep_consistency_percent),
        ];
        if winter {
            rationale.push(format!(
                "winter adjustment prefers waking {} minutes earlier",
                self.config.seasonal_shift_minutes
            ));
        }

        SmartSchedule {
            original_time: set_time,
            suggested_time: AlarmTime::from_minutes(set_time.minutes_since_midnight() + offset),
            confidence,
            rationale: rationale.join("; "),
        }
    }

    fn decide(
        &self,
        alarm: &Alarm,
        goal: &SleepGoal,
        report: &UserScheduleAnalysis,
        window: i32,
    ) -> Decision {
        let set_time = alarm.time;

        if alarm.smart.consistency_priority {
            let offset = set_time.signed_distance_to(&report.median_wake_time);
            if (-window..=0).contains(&offset) {
                return Decision::MedianWake { offset };
            }
        }

        let onset = self.sleep_onset(report, goal, set_time);
        let elapsed = forward_minutes(onset, set_time);
        let Some((offset, cycle)) =
            latest_cycle_boundary(elapsed, window, self.config.cycle_minutes)
        else {
            return Decision::NoBoundary;
        };

        let protecting = alarm.smart.adaptive_enabled
            && report.sleep_debt_minutes > self.config.adaptive_debt_threshold_minutes
            && offset < -(window / 2);
        if protecting {
            Decision::ProtectSleep {
                rejected_offset: offset,
            }
        } else {
            Decision::CycleBoundary { offset, cycle }
        }
    }

    /// Median bedtime plus sleep latency, or the goal bedtime when the
    /// median leaves less than one cycle before the alarm.
    fn sleep_onset(
        &self,
        report: &UserScheduleAnalysis,
        goal: &SleepGoal,
        set_time: AlarmTime,
    ) -> AlarmTime {
        let latency = self.config.sleep_latency_minutes;
        let observed =
            AlarmTime::from_minutes(report.median_bed_time.minutes_since_midnight() + latency);
        if forward_minutes(observed, set_time) >= self.config.cycle_minutes {
            observed
        } else {
            AlarmTime::from_minutes(goal.target_bedtime.minutes_since_midnight() + latency)
        }
    }

    fn describe(&self, decision: &Decision, report: &UserScheduleAnalysis, window: i32) -> String {
        match *decision {
            Decision::CycleBoundary { offset: 0, cycle } => format!(
                "set time already falls at the end of sleep cycle {cycle}, an estimated light-sleep phase"
            ),
            Decision::CycleBoundary { offset, cycle } => format!(
                "moved {} minutes earlier to align with an estimated light-sleep phase at the end of sleep cycle {cycle}",
                -offset
            ),
            Decision::MedianWake { offset: 0 } => {
                format!("kept at your consistent wake time of {}", report.median_wake_time)
            }
            Decision::MedianWake { offset } => format!(
                "moved {} minutes earlier to match your consistent wake time of {}",
                -offset, report.median_wake_time
            ),
            Decision::ProtectSleep { rejected_offset } => format!(
                "kept the set time instead of waking {} minutes early while carrying {} minutes of sleep debt",
                -rejected_offset, report.sleep_debt_minutes
            ),
            Decision::NoBoundary => format!(
                "no sleep-cycle boundary falls within the {window}-minute window; keeping the set time"
            ),
        }
    }
}
