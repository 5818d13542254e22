use crate::storage::error::StoreError;
use crate::storage::models::shadow_decision::*;
use crate::storage::repository::{DbExecutor, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::sync::Arc;

/// 影子決策儲存庫特徵
///
/// 只提供追加與讀取，紀錄寫入後不可修改或刪除。
#[async_trait]
pub trait ShadowDecisionRepository: Send + Sync {
    /// 追加一筆影子決策
    async fn append(&self, log: ShadowDecisionInsert) -> Result<ShadowDecisionLog, StoreError>;

    /// 依 ID 獲取紀錄
    async fn get_by_id(&self, id: i64) -> Result<Option<ShadowDecisionLog>, StoreError>;

    /// 依條件查詢，時間由新到舊
    async fn list(
        &self,
        strategy: &str,
        version: &str,
        filter: &ShadowDecisionFilter,
    ) -> Result<Vec<ShadowDecisionLog>, StoreError>;

    /// 統計時間範圍內各決策類型的數量
    async fn count_by_decision(
        &self,
        strategy: &str,
        version: &str,
        symbol: &str,
        range: TimeRange,
    ) -> Result<DecisionCounts, StoreError>;
}

const SHADOW_COLUMNS: &str =
    "id, version, strategy_name, symbol, timestamp, decision, features, confidence, metadata, created_at";

#[derive(Debug, sqlx::FromRow)]
struct ShadowDecisionRow {
    id: i64,
    version: String,
    strategy_name: String,
    symbol: String,
    timestamp: DateTime<Utc>,
    decision: String,
    features: Json<serde_json::Value>,
    confidence: Option<f64>,
    metadata: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ShadowDecisionRow> for ShadowDecisionLog {
    type Error = StoreError;

    fn try_from(row: ShadowDecisionRow) -> Result<Self, Self::Error> {
        let decision = row.decision.parse::<Decision>().map_err(StoreError::Corrupt)?;
        Ok(ShadowDecisionLog {
            id: row.id,
            version: row.version,
            strategy_name: row.strategy_name,
            symbol: row.symbol,
            timestamp: row.timestamp,
            decision,
            features: row.features.0,
            confidence: row.confidence,
            metadata: row.metadata.0,
            created_at: row.created_at,
        })
    }
}

/// PostgreSQL 影子決策儲存庫實現
pub struct PgShadowDecisionRepository {
    pool: Arc<PgPool>,
}

impl PgShadowDecisionRepository {
    /// 創建新的影子決策儲存庫
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

impl DbExecutor for PgShadowDecisionRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ShadowDecisionRepository for PgShadowDecisionRepository {
    async fn append(&self, log: ShadowDecisionInsert) -> Result<ShadowDecisionLog, StoreError> {
        let row: ShadowDecisionRow = sqlx::query_as(&format!(
            "INSERT INTO shadow_decision_logs ( \
                 version, strategy_name, symbol, timestamp, decision, features, confidence, metadata \
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {SHADOW_COLUMNS}"
        ))
        .bind(&log.version)
        .bind(&log.strategy_name)
        .bind(&log.symbol)
        .bind(log.timestamp)
        .bind(log.decision.as_str())
        .bind(Json(&log.features))
        .bind(log.confidence)
        .bind(Json(&log.metadata))
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        ShadowDecisionLog::try_from(row)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ShadowDecisionLog>, StoreError> {
        let row: Option<ShadowDecisionRow> = sqlx::query_as(&format!(
            "SELECT {SHADOW_COLUMNS} FROM shadow_decision_logs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        row.map(ShadowDecisionLog::try_from).transpose()
    }

    async fn list(
        &self,
        strategy: &str,
        version: &str,
        filter: &ShadowDecisionFilter,
    ) -> Result<Vec<ShadowDecisionLog>, StoreError> {
        let rows: Vec<ShadowDecisionRow> = sqlx::query_as(&format!(
            "SELECT {SHADOW_COLUMNS} FROM shadow_decision_logs \
             WHERE strategy_name = $1 AND version = $2 \
               AND ($3::TEXT IS NULL OR symbol = $3) \
               AND ($4::TIMESTAMPTZ IS NULL OR timestamp >= $4) \
               AND ($5::TIMESTAMPTZ IS NULL OR timestamp <= $5) \
             ORDER BY timestamp DESC, id DESC \
             LIMIT $6"
        ))
        .bind(strategy)
        .bind(version)
        .bind(filter.symbol.as_deref())
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(filter.limit)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        rows.into_iter().map(ShadowDecisionLog::try_from).collect()
    }

    async fn count_by_decision(
        &self,
        strategy: &str,
        version: &str,
        symbol: &str,
        range: TimeRange,
    ) -> Result<DecisionCounts, StoreError> {
        let (buy, sell, hold): (i64, i64, i64) = sqlx::query_as(
            "SELECT \
                 COUNT(*) FILTER (WHERE decision = 'buy'), \
                 COUNT(*) FILTER (WHERE decision = 'sell'), \
                 COUNT(*) FILTER (WHERE decision = 'hold') \
             FROM shadow_decision_logs \
             WHERE strategy_name = $1 AND version = $2 AND symbol = $3 \
               AND timestamp >= $4 AND timestamp <= $5",
        )
        .bind(strategy)
        .bind(version)
        .bind(symbol)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(DbExecutor::get_pool(self))
        .await?;

        Ok(DecisionCounts { buy, sell, hold })
    }
}
