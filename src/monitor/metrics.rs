use crate::config::MetricsConfig;
use crate::storage::models::Decision;
use anyhow::{anyhow, Result};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

/// 監控指標命名空間
pub const METRIC_NAMESPACE: &str = "rollout";

/// 路由目標
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Canary,
    Active,
    Unavailable,
}

impl RouteTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTarget::Canary => "canary",
            RouteTarget::Active => "active",
            RouteTarget::Unavailable => "unavailable",
        }
    }
}

/// 發布流程的遙測計數器
///
/// 只透過 `metrics` facade 記錄；未安裝 recorder 時為空操作。
pub struct RolloutMetrics;

impl RolloutMetrics {
    /// 記錄版本註冊
    pub fn record_registered(status: &'static str) {
        counter!(
            format!("{}.version_registered", METRIC_NAMESPACE),
            "status" => status
        )
        .increment(1);
    }

    /// 記錄版本啟用
    pub fn record_activated(via_canary: bool) {
        counter!(
            format!("{}.version_activated", METRIC_NAMESPACE),
            "from" => if via_canary { "canary" } else { "shadow" }
        )
        .increment(1);
    }

    /// 記錄版本退役
    ///
    /// `reason`: "manual"、"replaced" 或 "displaced"
    pub fn record_retired(reason: &'static str) {
        counter!(
            format!("{}.version_retired", METRIC_NAMESPACE),
            "reason" => reason
        )
        .increment(1);
    }

    /// 記錄金絲雀比例變更
    pub fn record_canary_percent_changed() {
        counter!(format!("{}.canary_percent_changed", METRIC_NAMESPACE)).increment(1);
    }

    /// 記錄成功寫入的影子決策
    pub fn record_shadow_decision(decision: Decision) {
        counter!(
            format!("{}.shadow_decision_recorded", METRIC_NAMESPACE),
            "decision" => decision.as_str()
        )
        .increment(1);
    }

    /// 記錄影子執行失敗
    pub fn record_shadow_failure(reason: &'static str) {
        counter!(
            format!("{}.shadow_decision_failed", METRIC_NAMESPACE),
            "reason" => reason
        )
        .increment(1);
    }

    /// 記錄未通過的隔離檢查
    pub fn record_isolation_failure(check: &'static str) {
        counter!(
            format!("{}.isolation_check_failed", METRIC_NAMESPACE),
            "check" => check
        )
        .increment(1);
    }

    /// 記錄交易衝突重試
    pub fn record_conflict_retry(operation: &'static str) {
        counter!(
            format!("{}.activation_conflict_retry", METRIC_NAMESPACE),
            "operation" => operation
        )
        .increment(1);
    }

    /// 記錄路由結果
    pub fn record_route(target: RouteTarget) {
        counter!(
            format!("{}.route", METRIC_NAMESPACE),
            "target" => target.as_str()
        )
        .increment(1);
    }
}

/// 依配置安裝 Prometheus 匯出器
///
/// 未啟用或未設定監聽位址時不安裝，回傳 `Ok(false)`。
pub fn install_prometheus(config: &MetricsConfig) -> Result<bool> {
    if !config.enabled {
        return Ok(false);
    }

    let Some(addr) = config.listen_addr()? else {
        warn!("已啟用指標但未設定 prometheus_listen，略過匯出器安裝");
        return Ok(false);
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow!("Prometheus 匯出器安裝失敗: {}", e))?;

    info!("Prometheus 指標匯出器已啟動: {}", addr);
    Ok(true)
}
