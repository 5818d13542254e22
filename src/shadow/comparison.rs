use crate::storage::models::DecisionCounts;
use crate::storage::repository::TimeRange;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 影子版本與正式版本的決策量比較
///
/// 只是粗略的量差指標，不代表正確性；統計檢定由外部處理。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub strategy_name: String,
    pub shadow_version: String,
    pub symbol: String,
    pub window_days: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub shadow: DecisionCounts,
    pub active: DecisionCounts,
    /// |影子訊號數 - 正式訊號數|
    pub divergence_count: i64,
    /// divergence_count / max(影子總數, 1) * 100
    pub divergence_rate: f64,
}

impl ComparisonReport {
    pub fn new(
        strategy_name: &str,
        shadow_version: &str,
        symbol: &str,
        window_days: u32,
        range: TimeRange,
        shadow: DecisionCounts,
        active: DecisionCounts,
    ) -> Self {
        let divergence_count = (shadow.signals() - active.signals()).abs();
        let divergence_rate = divergence_count as f64 / shadow.total().max(1) as f64 * 100.0;

        Self {
            strategy_name: strategy_name.to_string(),
            shadow_version: shadow_version.to_string(),
            symbol: symbol.to_string(),
            window_days,
            start: range.start,
            end: range.end,
            shadow,
            active,
            divergence_count,
            divergence_rate,
        }
    }
}
