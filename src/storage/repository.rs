use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

// 重新導出子模塊
pub mod memory;
pub mod production_decision;
pub mod shadow_decision;
pub mod strategy_version;

// 重新導出常用類型
pub use memory::{
    InMemoryProductionStore, InMemoryShadowDecisionRepository, InMemoryStrategyVersionRepository,
    SideEffectRecord,
};
pub use production_decision::{
    AuditScope, PgProductionDecisionReader, ProductionDecisionReader, SideEffectAudit,
};
pub use shadow_decision::{PgShadowDecisionRepository, ShadowDecisionRepository};
pub use strategy_version::{PgStrategyVersionRepository, StrategyVersionRepository, VersionError};

/// 時間範圍查詢（閉區間）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[end - days, end]`，超出可表示範圍時起點取最早時間
    pub fn last_days(end: DateTime<Utc>, days: u32) -> Self {
        let start = Duration::try_days(i64::from(days))
            .and_then(|span| end.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end }
    }

    /// 以 `center` 為中心、前後各 `radius` 的範圍，兩端在可表示範圍內截斷
    pub fn around(center: DateTime<Utc>, radius: Duration) -> Self {
        Self {
            start: center
                .checked_sub_signed(radius)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: center
                .checked_add_signed(radius)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// 返回一個表示無限時間範圍的 TimeRange
    pub fn all_time() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all_time()
    }
}

/// 通用的數據庫操作特性
pub trait DbExecutor {
    fn get_pool(&self) -> &PgPool;
}

/// 判斷是否為可重試的交易衝突（序列化失敗或死結）
pub(crate) fn is_transaction_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

/// 是否為資料表不存在 (42P01)
pub(crate) fn is_undefined_table(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

/// 取得唯一鍵衝突的約束名稱
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}
