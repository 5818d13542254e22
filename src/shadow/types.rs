use crate::storage::models::Decision;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 候選決策的方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
            Side::Flat => "flat",
        }
    }

    pub fn to_decision(self) -> Decision {
        match self {
            Side::Long => Decision::Buy,
            Side::Short => Decision::Sell,
            Side::Flat => Decision::Hold,
        }
    }
}

/// 決策函數產生的候選
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub side: Side,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// 預期範圍 [0, 1]，超出時寫入前會被截斷
    pub confidence: Option<f64>,
    /// 策略自行宣告的額外特徵
    #[serde(default)]
    pub features: Map<String, Value>,
}

impl Candidate {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            confidence: None,
            features: Map::new(),
        }
    }

    pub fn with_levels(mut self, entry_price: f64, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.entry_price = Some(entry_price);
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_feature(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.features.insert(key.into(), value.into());
        self
    }

    /// 寫入紀錄用的特徵快照：策略特徵加上進出場價位
    pub fn feature_snapshot(&self) -> Value {
        let mut snapshot = self.features.clone();
        snapshot.insert("side".to_string(), Value::from(self.side.as_str()));
        let levels = [
            ("entry_price", self.entry_price),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ];
        for (key, level) in levels {
            if let Some(price) = level {
                snapshot.insert(key.to_string(), Value::from(price));
            }
        }
        Value::Object(snapshot)
    }

    /// 截斷至 [0, 1]；非有限值視為未提供
    pub fn normalized_confidence(&self) -> Option<f64> {
        self.confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
    }
}

/// 決策函數的輸入上下文（行情、指標等），核心不解讀
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub inputs: Value,
}

impl DecisionContext {
    pub fn new(inputs: Value) -> Self {
        Self { inputs }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }
}

/// 外部注入的策略決策函數
///
/// 回傳依偏好排序的候選列表，核心只取第一個。
/// 實作不得產生可歸因於影子執行的副作用。
#[async_trait]
pub trait DecisionFunction: Send + Sync {
    async fn decide(
        &self,
        context: &DecisionContext,
        symbol: &str,
        timestamp: DateTime<Utc>,
        config: &Value,
    ) -> anyhow::Result<Vec<Candidate>>;
}

/// 以同步閉包實作的決策函數
pub struct FnDecision<F>(pub F);

#[async_trait]
impl<F> DecisionFunction for FnDecision<F>
where
    F: Fn(&DecisionContext, &str, DateTime<Utc>, &Value) -> anyhow::Result<Vec<Candidate>> + Send + Sync,
{
    async fn decide(
        &self,
        context: &DecisionContext,
        symbol: &str,
        timestamp: DateTime<Utc>,
        config: &Value,
    ) -> anyhow::Result<Vec<Candidate>> {
        (self.0)(context, symbol, timestamp, config)
    }
}
