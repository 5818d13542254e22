use crate::storage::models::strategy_version::{StrategyVersion, VersionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 金絲雀配置模型（每個策略至多一筆）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryConfig {
    pub strategy_name: String,
    pub version: String,
    /// 流量百分比，範圍 [0, 100]
    pub rollout_percent: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

/// 設定金絲雀的結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryAssignment {
    pub version: StrategyVersion,
    pub config: CanaryConfig,
    /// 被取代而退役的前一個金絲雀版本
    pub displaced: Option<StrategyVersion>,
}

/// 路由所需的最小狀態，由一次儲存讀取取得
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingSnapshot {
    pub active: Option<StrategyVersion>,
    pub canary_version: Option<StrategyVersion>,
    pub canary_config: Option<CanaryConfig>,
}

impl RoutingSnapshot {
    /// 目前有效的金絲雀（配置存在、比例大於 0、且指向 CANARY 版本）
    ///
    /// 配置若指向已非 CANARY 的版本，視為沒有金絲雀。
    pub fn effective_canary(&self) -> Option<(&StrategyVersion, f64)> {
        let config = self.canary_config.as_ref()?;
        let version = self.canary_version.as_ref()?;

        let points_at_canary = version.status == VersionStatus::Canary
            && version.version == config.version
            && version.strategy_name == config.strategy_name;

        (points_at_canary && config.rollout_percent > 0.0).then_some((version, config.rollout_percent))
    }
}
