use crate::storage::error::StoreError;
use crate::storage::models::production_decision::*;
use crate::storage::repository::{DbExecutor, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;

/// 正式決策讀取介面（唯讀）
#[async_trait]
pub trait ProductionDecisionReader: Send + Sync {
    /// 依策略與條件查詢正式決策，時間由新到舊
    async fn list_decisions(
        &self,
        strategy: &str,
        filter: &ProductionDecisionFilter,
    ) -> Result<Vec<ProductionDecision>, StoreError>;
}

/// 副作用稽核範圍
#[derive(Debug, Clone, PartialEq)]
pub struct AuditScope {
    pub strategy_name: String,
    pub version: String,
    pub symbol: String,
    pub range: TimeRange,
}

/// 正式路徑副作用的唯讀稽核介面
///
/// 計算可歸因於指定版本的已發布訊號、已執行交易與已發送通知。
#[async_trait]
pub trait SideEffectAudit: Send + Sync {
    async fn count_published_signals(&self, scope: &AuditScope) -> Result<i64, StoreError>;

    async fn count_executed_trades(&self, scope: &AuditScope) -> Result<i64, StoreError>;

    async fn count_sent_notifications(&self, scope: &AuditScope) -> Result<i64, StoreError>;
}

#[derive(Debug, sqlx::FromRow)]
struct ProductionDecisionRow {
    id: i64,
    strategy_name: String,
    symbol: String,
    timestamp: DateTime<Utc>,
    outcome: String,
    features: Json<serde_json::Value>,
}

impl TryFrom<ProductionDecisionRow> for ProductionDecision {
    type Error = StoreError;

    fn try_from(row: ProductionDecisionRow) -> Result<Self, Self::Error> {
        let outcome = row.outcome.parse::<DecisionOutcome>().map_err(StoreError::Corrupt)?;
        Ok(ProductionDecision {
            id: row.id,
            strategy_name: row.strategy_name,
            symbol: row.symbol,
            timestamp: row.timestamp,
            outcome,
            features: row.features.0,
        })
    }
}

/// PostgreSQL 正式決策讀取端
///
/// 讀取由正式交易管線維護的資料表，本核心不建立也不寫入它們：
/// `strategy_decisions(id, strategy_name, symbol, timestamp, outcome, features)`、
/// `published_signals`、`executed_trades`、`sent_notifications`
/// （後三者皆含 `strategy_name, strategy_version, symbol, created_at`）。
pub struct PgProductionDecisionReader {
    pool: Arc<PgPool>,
}

impl PgProductionDecisionReader {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn count_side_effects(&self, table: SideEffectTable, scope: &AuditScope) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} \
             WHERE strategy_name = $1 AND strategy_version = $2 AND symbol = $3 \
               AND created_at >= $4 AND created_at <= $5",
            table.as_str()
        ))
        .bind(&scope.strategy_name)
        .bind(&scope.version)
        .bind(&scope.symbol)
        .bind(scope.range.start)
        .bind(scope.range.end)
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(count)
    }
}

#[derive(Debug, Clone, Copy)]
enum SideEffectTable {
    Signals,
    Trades,
    Notifications,
}

impl SideEffectTable {
    fn as_str(&self) -> &'static str {
        match self {
            SideEffectTable::Signals => "published_signals",
            SideEffectTable::Trades => "executed_trades",
            SideEffectTable::Notifications => "sent_notifications",
        }
    }
}

impl DbExecutor for PgProductionDecisionReader {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProductionDecisionReader for PgProductionDecisionReader {
    async fn list_decisions(
        &self,
        strategy: &str,
        filter: &ProductionDecisionFilter,
    ) -> Result<Vec<ProductionDecision>, StoreError> {
        let rows: Vec<ProductionDecisionRow> = sqlx::query_as(
            "SELECT id, strategy_name, symbol, timestamp, outcome, features \
             FROM strategy_decisions \
             WHERE strategy_name = $1 \
               AND ($2::TEXT IS NULL OR symbol = $2) \
               AND ($3::TIMESTAMPTZ IS NULL OR timestamp >= $3) \
               AND ($4::TIMESTAMPTZ IS NULL OR timestamp <= $4) \
             ORDER BY timestamp DESC, id DESC",
        )
        .bind(strategy)
        .bind(filter.symbol.as_deref())
        .bind(filter.start_time)
        .bind(filter.end_time)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        rows.into_iter().map(ProductionDecision::try_from).collect()
    }
}

#[async_trait]
impl SideEffectAudit for PgProductionDecisionReader {
    async fn count_published_signals(&self, scope: &AuditScope) -> Result<i64, StoreError> {
        self.count_side_effects(SideEffectTable::Signals, scope).await
    }

    async fn count_executed_trades(&self, scope: &AuditScope) -> Result<i64, StoreError> {
        self.count_side_effects(SideEffectTable::Trades, scope).await
    }

    async fn count_sent_notifications(&self, scope: &AuditScope) -> Result<i64, StoreError> {
        self.count_side_effects(SideEffectTable::Notifications, scope).await
    }
}
