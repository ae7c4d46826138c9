use crate::models::UserScheduleAnalysis;
use crate::optimizer::config::OptimizerConfig;

/// Compute confidence using a 3-factor weighted average.
/// Returns (confidence, data_score, consistency_score, proximity_score).
pub fn compute_confidence(
    report: &UserScheduleAnalysis,
    chosen_offset: Option<i32>,
    preferred_offset: i32,
    window_minutes: i32,
    config: &OptimizerConfig,
) -> (f64, f64, f64, f64) {
    let data_score = score_data(report.nights_analyzed, config.full_data_nights);
    let consistency_score = (report.sleep_consistency_percent / 100.0).clamp(0.0, 1.0);
    let proximity_score = score_proximity(chosen_offset, preferred_offset, window_minutes);

    let confidence = (config.weight_data * data_score
        + config.weight_consistency * consistency_score
        + config.weight_proximity * proximity_score)
        .clamp(0.0, 1.0);

    (confidence, data_score, consistency_score, proximity_score)
}

/// Linear up to `full_nights`, then saturates at 1.0.
fn score_data(nights: usize, full_nights: usize) -> f64 {
    if full_nights == 0 {
        return 1.0;
    }
    (nights as f64 / full_nights as f64).min(1.0)
}

/// 1.0 at the preferred point, 0.0 half a window away.
/// Offsets are minutes relative to the set time (negative = earlier).
fn score_proximity(chosen_offset: Option<i32>, preferred_offset: i32, window_minutes: i32) -> f64 {
    let Some(chosen) = chosen_offset else {
        return 0.5; // No boundary in the window
    };
    let half_window = f64::from(window_minutes.max(1)) / 2.0;
    let distance = f64::from((chosen - preferred_offset).abs());
    (1.0 - distance / half_window).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_score_saturates() {
        assert_eq!(score_data(7, 14), 0.5);
        assert_eq!(score_data(40, 14), 1.0);
    }

    #[test]
    fn proximity_peaks_at_preferred_point() {
        assert_eq!(score_proximity(Some(-15), -15, 30), 1.0);
        assert_eq!(score_proximity(Some(-30), -15, 30), 0.0);
        assert_eq!(score_proximity(Some(-20), -15, 20), 0.5);
        assert_eq!(score_proximity(None, -15, 30), 0.5);
    }
}
