pub mod analyzer;
pub mod config;
mod recommendations;

pub use analyzer::ScheduleAnalyzer;
pub use config::AnalyzerConfig;
