use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 標記紀錄於影子隔離下產生的 metadata 鍵
pub const SHADOW_MODE_KEY: &str = "shadow_mode";

/// 三態決策
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// 做多 / 買入
    Buy,
    /// 做空 / 賣出
    Sell,
    /// 不動作
    Hold,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Buy => "buy",
            Decision::Sell => "sell",
            Decision::Hold => "hold",
        }
    }

    /// Buy 或 Sell 視為訊號
    pub fn is_signal(&self) -> bool {
        !matches!(self, Decision::Hold)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buy" | "long" => Ok(Decision::Buy),
            "sell" | "short" => Ok(Decision::Sell),
            "hold" => Ok(Decision::Hold),
            other => Err(format!("未知的決策類型: {}", other)),
        }
    }
}

/// 影子決策紀錄模型（寫入後不可變）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDecisionLog {
    pub id: i64,
    pub version: String,
    pub strategy_name: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    /// 當次決策使用的輸入特徵快照
    pub features: serde_json::Value,
    pub confidence: Option<f64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ShadowDecisionLog {
    /// metadata 是否帶有影子隔離標記
    pub fn has_shadow_flag(&self) -> bool {
        self.metadata
            .get(SHADOW_MODE_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// 影子決策插入模型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDecisionInsert {
    pub version: String,
    pub strategy_name: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub decision: Decision,
    pub features: serde_json::Value,
    pub confidence: Option<f64>,
    pub metadata: serde_json::Value,
}

/// 影子決策查詢過濾器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShadowDecisionFilter {
    pub symbol: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl ShadowDecisionFilter {
    pub fn matches(&self, log: &ShadowDecisionLog) -> bool {
        self.symbol.as_deref().map_or(true, |s| s == log.symbol)
            && self.start_time.map_or(true, |start| log.timestamp >= start)
            && self.end_time.map_or(true, |end| log.timestamp <= end)
    }
}

/// 各決策類型的計數
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub buy: i64,
    pub sell: i64,
    pub hold: i64,
}

impl DecisionCounts {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Buy => self.buy += 1,
            Decision::Sell => self.sell += 1,
            Decision::Hold => self.hold += 1,
        }
    }

    /// Buy + Sell
    pub fn signals(&self) -> i64 {
        self.buy + self.sell
    }

    pub fn total(&self) -> i64 {
        self.buy + self.sell + self.hold
    }
}

impl FromIterator<Decision> for DecisionCounts {
    fn from_iter<I: IntoIterator<Item = Decision>>(iter: I) -> Self {
        let mut counts = DecisionCounts::default();
        for decision in iter {
            counts.record(decision);
        }
        counts
    }
}
