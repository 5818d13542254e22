use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 個別隔離檢查項目
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationCheckKind {
    /// 紀錄帶有影子隔離標記
    ShadowFlagRecorded,
    /// 沒有已發布的訊號
    NoSignalPublished,
    /// 沒有已執行的交易
    NoTradeExecuted,
    /// 沒有已發送的通知
    NoNotificationSent,
}

impl IsolationCheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationCheckKind::ShadowFlagRecorded => "shadow_flag_recorded",
            IsolationCheckKind::NoSignalPublished => "no_signal_published",
            IsolationCheckKind::NoTradeExecuted => "no_trade_executed",
            IsolationCheckKind::NoNotificationSent => "no_notification_sent",
        }
    }
}

impl fmt::Display for IsolationCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationCheck {
    pub kind: IsolationCheckKind,
    pub passed: bool,
    /// 觀察到的違規資料列數（旗標檢查為 0 或 1）
    pub observed: i64,
}

impl IsolationCheck {
    /// 計數型檢查：觀察數為 0 才通過
    pub fn from_count(kind: IsolationCheckKind, observed: i64) -> Self {
        Self {
            kind,
            passed: observed == 0,
            observed,
        }
    }

    pub fn flag(kind: IsolationCheckKind, present: bool) -> Self {
        Self {
            kind,
            passed: present,
            observed: i64::from(!present),
        }
    }
}

/// 單筆影子紀錄的隔離驗證報告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationReport {
    pub shadow_log_id: i64,
    pub strategy_name: String,
    pub version: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<IsolationCheck>,
}

impl IsolationReport {
    /// 全部檢查皆通過
    pub fn is_isolated(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn check(&self, kind: IsolationCheckKind) -> Option<&IsolationCheck> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &IsolationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_are_reported_individually() {
        let report = IsolationReport {
            shadow_log_id: 7,
            strategy_name: "fib_rsi".to_string(),
            version: "v2".to_string(),
            symbol: "BTCUSDT".to_string(),
            timestamp: Utc::now(),
            checks: vec![
                IsolationCheck::flag(IsolationCheckKind::ShadowFlagRecorded, true),
                IsolationCheck::from_count(IsolationCheckKind::NoSignalPublished, 0),
                IsolationCheck::from_count(IsolationCheckKind::NoTradeExecuted, 2),
                IsolationCheck::from_count(IsolationCheckKind::NoNotificationSent, 0),
            ],
        };

        assert!(!report.is_isolated());
        let failed: Vec<_> = report.failed_checks().map(|c| c.kind).collect();
        assert_eq!(failed, vec![IsolationCheckKind::NoTradeExecuted]);
        assert_eq!(report.check(IsolationCheckKind::NoTradeExecuted).unwrap().observed, 2);
        assert!(report.check(IsolationCheckKind::NoSignalPublished).unwrap().passed);
    }

    #[test]
    fn test_missing_flag_fails() {
        let check = IsolationCheck::flag(IsolationCheckKind::ShadowFlagRecorded, false);
        assert!(!check.passed);
        assert_eq!(check.observed, 1);
    }
}
