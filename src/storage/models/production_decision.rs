use crate::storage::models::shadow_decision::Decision;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 正式路徑決策的結果分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    /// 已進場
    Entered,
    /// 略過
    Skipped,
    /// 被風控或其他規則拒絕
    Rejected,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Entered => "entered",
            DecisionOutcome::Skipped => "skipped",
            DecisionOutcome::Rejected => "rejected",
        }
    }
}

impl FromStr for DecisionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "entered" => Ok(DecisionOutcome::Entered),
            "skipped" => Ok(DecisionOutcome::Skipped),
            "rejected" => Ok(DecisionOutcome::Rejected),
            other => Err(format!("未知的決策結果: {}", other)),
        }
    }
}

/// 正式決策模型（外部資料，核心僅讀取）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionDecision {
    pub id: i64,
    pub strategy_name: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: DecisionOutcome,
    pub features: serde_json::Value,
}

impl ProductionDecision {
    /// 紀錄於 features 中的方向
    pub fn side(&self) -> Option<&str> {
        self.features.get("side").and_then(serde_json::Value::as_str)
    }

    /// 換算為三態決策
    ///
    /// Entered 依 side 分為 Buy / Sell，無法辨識的 side 計為 Hold；
    /// Skipped 與 Rejected 一律為 Hold。
    pub fn as_decision(&self) -> Decision {
        match self.outcome {
            DecisionOutcome::Entered => self
                .side()
                .and_then(|side| side.parse::<Decision>().ok())
                .unwrap_or(Decision::Hold),
            DecisionOutcome::Skipped | DecisionOutcome::Rejected => Decision::Hold,
        }
    }
}

/// 正式決策查詢過濾器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductionDecisionFilter {
    pub symbol: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ProductionDecisionFilter {
    pub fn matches(&self, decision: &ProductionDecision) -> bool {
        self.symbol.as_deref().map_or(true, |s| s == decision.symbol)
            && self.start_time.map_or(true, |start| decision.timestamp >= start)
            && self.end_time.map_or(true, |end| decision.timestamp <= end)
    }
}
