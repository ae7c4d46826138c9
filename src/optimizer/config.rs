/// Configuration for the wake-time optimizer with tunable thresholds.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Length of one estimated sleep cycle
    pub cycle_minutes: i32,

    /// Added to the median bedtime to estimate when sleep actually starts
    pub sleep_latency_minutes: i32,

    /// Nights of history at which the data factor saturates
    pub full_data_nights: usize,

    /// Adaptive mode only protects sleep above this much debt
    pub adaptive_debt_threshold_minutes: u32,

    /// Winter shift of the preferred wake point (Nov..Feb)
    pub seasonal_shift_minutes: i32,

    /// Reported when there is too little history to optimize
    pub insufficient_data_confidence: f64,

    /// Confidence scoring weights
    pub weight_data: f64,
    pub weight_consistency: f64,
    pub weight_proximity: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cycle_minutes: 90,
            sleep_latency_minutes: 15,
            full_data_nights: 14,
            adaptive_debt_threshold_minutes: 60,
            seasonal_shift_minutes: 10,
            insufficient_data_confidence: 0.25,
            weight_data: 0.30,
            weight_consistency: 0.40,
            weight_proximity: 0.30,
        }
    }
}
