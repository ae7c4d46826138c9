pub mod confidence;
pub mod config;
pub mod wake_time;

pub use config::OptimizerConfig;
pub use wake_time::WakeTimeOptimizer;
