/// Tunable thresholds for the schedule analyzer.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Fewer nights than this is reported as insufficient data.
    pub min_nights: usize,

    /// Only nights that ended within this many days of the latest night count.
    pub window_days: u32,

    /// Sleep debt only accumulates over the most recent nights (rolling cap).
    pub debt_window_nights: usize,

    /// Wake-time variance (min²) at which consistency drops to 50%.
    pub consistency_variance_scale: f64,

    /// Distance from the target wake time at which alignment reaches zero.
    pub alignment_zero_at_minutes: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_nights: 3,
            window_days: 30,
            debt_window_nights: 7,
            consistency_variance_scale: 900.0,
            alignment_zero_at_minutes: 180.0,
        }
    }
}
