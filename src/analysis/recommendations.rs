use crate::analysis::analyzer::time_spread;
use crate::models::{
    AlarmTime, Impact, ScheduleRecommendation, SleepGoal, SleepRecord, UserScheduleAnalysis,
};

const DEBT_THRESHOLD_MINUTES: u32 = 120;
const LOW_CONSISTENCY_PERCENT: f64 = 60.0;
const POOR_CONSISTENCY_PERCENT: f64 = 40.0;
const LOW_ALIGNMENT_PERCENT: f64 = 70.0;
const SHORT_SLEEP_SLACK_MINUTES: u32 = 30;
const MAX_SHIFT_MINUTES: i32 = 60;

fn recommendation(
    description: String,
    impact: Impact,
    expected_improvement: &str,
    time_adjustment_minutes: i32,
) -> ScheduleRecommendation {
    ScheduleRecommendation {
        description,
        impact,
        expected_improvement: expected_improvement.to_string(),
        time_adjustment_minutes,
    }
}

/// Spread sleep debt over a week, in 5 minute steps.
fn debt_adjustment(debt_minutes: u32) -> i32 {
    let per_night = f64::from(debt_minutes) / 7.0;
    let rounded = ((per_night / 5.0).round() * 5.0) as i32;
    -rounded.clamp(15, MAX_SHIFT_MINUTES)
}

fn weekend_drift(nights: &[SleepRecord]) -> Option<i32> {
    let (weekend, weekday): (Vec<&SleepRecord>, Vec<&SleepRecord>) =
        nights.iter().partition(|night| night.woke_on_weekend());

    let weekend_times: Vec<AlarmTime> = weekend.iter().map(|night| night.wake_time()).collect();
    let weekday_times: Vec<AlarmTime> = weekday.iter().map(|night| night.wake_time()).collect();

    let weekend_median = time_spread(&weekend_times)?.median;
    let weekday_median = time_spread(&weekday_times)?.median;
    Some(weekday_median.signed_distance_to(&weekend_median))
}

/// Ranked advice for a finished analysis, highest impact first.
pub(crate) fn build_recommendations(
    report: &UserScheduleAnalysis,
    goal: &SleepGoal,
    nights: &[SleepRecord],
) -> Vec<ScheduleRecommendation> {
    let mut recommendations = Vec::new();

    let debt = report.sleep_debt_minutes;
    if debt >= DEBT_THRESHOLD_MINUTES {
        let shift = debt_adjustment(debt);
        recommendations.push(recommendation(
            format!(
                "You are carrying {} hours {} minutes of sleep debt; go to bed {} minutes earlier this week",
                debt / 60,
                debt % 60,
                -shift
            ),
            Impact::High,
            "Recover lost sleep within about a week",
            shift,
        ));
    }

    let consistency = report.sleep_consistency_percent;
    if consistency < LOW_CONSISTENCY_PERCENT {
        let impact = if consistency < POOR_CONSISTENCY_PERCENT {
            Impact::High
        } else {
            Impact::Medium
        };
        recommendations.push(recommendation(
            format!(
                "Wake up at the same time every day; your wake time varies by about {:.0} minutes",
                report.wake_time_std_dev_minutes
            ),
            impact,
            "A steadier body clock and easier mornings",
            0,
        ));
    }

    if report.chronotype_alignment_percent < LOW_ALIGNMENT_PERCENT {
        let shift = report
            .median_wake_time
            .signed_distance_to(&goal.target_wake_time)
            .clamp(-MAX_SHIFT_MINUTES, MAX_SHIFT_MINUTES);
        let direction = if shift < 0 { "earlier" } else { "later" };
        recommendations.push(recommendation(
            format!(
                "You usually wake at {} but aim for {}; shift your routine {} minutes {}",
                report.median_wake_time,
                goal.target_wake_time,
                shift.abs(),
                direction
            ),
            Impact::Medium,
            "Wake times that match your natural rhythm",
            shift,
        ));
    }

    let short_threshold = goal
        .target_duration_minutes
        .saturating_sub(SHORT_SLEEP_SLACK_MINUTES);
    if debt < DEBT_THRESHOLD_MINUTES && report.average_sleep_duration_minutes < short_threshold {
        let shortfall = goal.target_duration_minutes - report.average_sleep_duration_minutes;
        let shift = -(i32::try_from(shortfall).unwrap_or(MAX_SHIFT_MINUTES)).min(MAX_SHIFT_MINUTES);
        recommendations.push(recommendation(
            format!(
                "You average {} minutes of sleep against a goal of {}; move bedtime earlier",
                report.average_sleep_duration_minutes, goal.target_duration_minutes
            ),
            Impact::Medium,
            "Closer to your nightly sleep goal",
            shift,
        ));
    }

    if goal.consistency {
        if let Some(drift) = weekend_drift(nights) {
            let allowed = i32::try_from(goal.weekend_variation_minutes).unwrap_or(i32::MAX);
            if drift.abs() > allowed {
                recommendations.push(recommendation(
                    format!(
                        "Weekend wake times drift {} minutes from weekdays; keep them within {} minutes",
                        drift.abs(),
                        goal.weekend_variation_minutes
                    ),
                    Impact::Low,
                    "Less Monday-morning grogginess",
                    -drift.signum() * (drift.abs() - allowed).min(MAX_SHIFT_MINUTES),
                ));
            }
        }
    }

    if recommendations.is_empty() {
        recommendations.push(recommendation(
            "Your sleep schedule is on track; keep your current routine".to_string(),
            Impact::Low,
            "Maintain current sleep quality",
            0,
        ));
    }

    // Stable sort keeps insertion order inside an impact level.
    recommendations.sort_by(|a, b| b.impact.cmp(&a.impact));
    recommendations
}
