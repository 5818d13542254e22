use thiserror::Error;

/// 影子紀錄與正式決策讀取端共用的儲存錯誤
#[derive(Debug, Error)]
pub enum StoreError {
    /// 資料庫錯誤
    #[error("資料庫錯誤: {0}")]
    Database(#[from] sqlx::Error),

    /// 資料列內容無法轉換為模型
    #[error("資料內容損毀: {0}")]
    Corrupt(String),
}
