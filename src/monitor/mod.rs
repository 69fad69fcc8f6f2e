mod system_stats;
mod task;

pub use system_stats::{MetricSource, SystemStats, SystemStatsCollector};
pub use task::SensorTask;
