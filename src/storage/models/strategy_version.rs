use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 策略版本生命週期狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    /// 只接受影子執行，不承接任何流量
    Shadow,
    /// 依比例承接部分流量
    Canary,
    /// 承接其餘全部流量
    Active,
    /// 終止狀態，僅保留歷史
    Retired,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Shadow => "SHADOW",
            VersionStatus::Canary => "CANARY",
            VersionStatus::Active => "ACTIVE",
            VersionStatus::Retired => "RETIRED",
        }
    }

    /// 操作可直接觸發的轉換 `self -> next`
    ///
    /// ACTIVE -> RETIRED 只會隨另一版本啟用而發生，不在此列。
    pub fn can_transition_to(&self, next: VersionStatus) -> bool {
        use VersionStatus::*;
        matches!(
            (self, next),
            (Shadow, Canary) | (Shadow, Active) | (Shadow, Retired) | (Canary, Active) | (Canary, Retired)
        )
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SHADOW" => Ok(VersionStatus::Shadow),
            "CANARY" => Ok(VersionStatus::Canary),
            "ACTIVE" => Ok(VersionStatus::Active),
            "RETIRED" => Ok(VersionStatus::Retired),
            other => Err(format!("未知的版本狀態: {}", other)),
        }
    }
}

/// 策略版本模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyVersion {
    pub id: i64,
    pub strategy_name: String,
    pub version: String,
    pub status: VersionStatus,
    /// 策略自訂參數，核心不解讀，原樣轉交決策函數
    pub config: serde_json::Value,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl StrategyVersion {
    /// 影子引擎可驅動的版本（SHADOW 或 CANARY）
    pub fn is_shadow_eligible(&self) -> bool {
        matches!(self.status, VersionStatus::Shadow | VersionStatus::Canary)
    }

    /// 轉為 ACTIVE 並設定啟用時間
    pub(crate) fn mark_active(&mut self, now: DateTime<Utc>) {
        self.status = VersionStatus::Active;
        self.activated_at = Some(now);
        self.updated_at = now;
    }

    /// 轉為 RETIRED 並設定退役時間
    pub(crate) fn mark_retired(&mut self, now: DateTime<Utc>) {
        self.status = VersionStatus::Retired;
        self.retired_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn mark_canary(&mut self, now: DateTime<Utc>) {
        self.status = VersionStatus::Canary;
        self.updated_at = now;
    }
}

/// 策略版本插入模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStrategyVersion {
    pub strategy_name: String,
    pub version: String,
    pub config: serde_json::Value,
    pub status: VersionStatus,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

impl NewStrategyVersion {
    pub fn new(
        strategy_name: impl Into<String>,
        version: impl Into<String>,
        config: serde_json::Value,
        status: VersionStatus,
    ) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            version: version.into(),
            config,
            status,
            description: None,
            created_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }
}

/// 啟用版本的結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationOutcome {
    /// 新的 ACTIVE 版本
    pub activated: StrategyVersion,
    /// 被退役的前一個 ACTIVE 版本
    pub retired: Option<StrategyVersion>,
    /// 若目標原本是金絲雀，其金絲雀配置已被刪除
    pub canary_cleared: bool,
}

/// 退役版本的結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetirementOutcome {
    pub version: StrategyVersion,
    /// 本次呼叫是否實際改變了狀態；已退役的版本為 false
    pub changed: bool,
}
