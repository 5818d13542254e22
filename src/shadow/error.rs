use crate::storage::error::StoreError;
use std::time::Duration;
use thiserror::Error;

/// 影子執行錯誤
#[derive(Debug, Error)]
pub enum ShadowError {
    /// 決策函數回傳錯誤
    #[error("決策函數執行失敗: {0:#}")]
    DecisionFunction(anyhow::Error),

    /// 決策函數逾時
    #[error("決策函數逾時 ({0:?})")]
    DecisionTimeout(Duration),

    /// 影子紀錄不存在
    #[error("影子決策紀錄不存在: {0}")]
    NotFound(i64),

    #[error("儲存層錯誤: {0}")]
    Store(#[from] StoreError),
}

impl ShadowError {
    /// 遙測標籤
    pub fn reason(&self) -> &'static str {
        match self {
            ShadowError::DecisionFunction(_) => "decision_error",
            ShadowError::DecisionTimeout(_) => "timeout",
            ShadowError::NotFound(_) => "not_found",
            ShadowError::Store(_) => "store",
        }
    }
}
