// monitor.rs - 日誌與遙測

pub mod logger;
pub mod metrics;

pub use logger::init_logging;
pub use metrics::{install_prometheus, RolloutMetrics, RouteTarget};
