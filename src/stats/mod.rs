//! Statistics and metrics for bus sessions

pub mod metrics;

pub use metrics::SessionStats;
pub(crate) use metrics::StatsCounters;
