use crate::storage::models::canary_config::*;
use crate::storage::models::strategy_version::*;
use crate::storage::repository::{is_transaction_conflict, unique_violation, DbExecutor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;

/// 版本相關錯誤
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// (策略, 版本) 已存在
    #[error("版本已存在: {strategy}@{version}")]
    AlreadyExists { strategy: String, version: String },

    /// 策略已有 ACTIVE 版本
    #[error("策略 {0} 已有 ACTIVE 版本")]
    ConflictingActive(String),

    /// 目標版本已是 ACTIVE
    #[error("版本已是 ACTIVE: {strategy}@{version}")]
    AlreadyActive { strategy: String, version: String },

    /// 版本不存在
    #[error("版本不存在: {strategy}@{version}")]
    NotFound { strategy: String, version: String },

    /// 策略沒有金絲雀配置
    #[error("策略 {0} 沒有金絲雀配置")]
    NoActiveCanary(String),

    /// 不可直接退役 ACTIVE 版本
    #[error("無法退役目前的 ACTIVE 版本: {strategy}@{version}")]
    CannotRetireActive { strategy: String, version: String },

    /// 狀態機不允許的轉換
    #[error("不允許的狀態轉換 {strategy}@{version}: {from} -> {to}")]
    InvalidTransition {
        strategy: String,
        version: String,
        from: VersionStatus,
        to: VersionStatus,
    },

    /// 交易序列化衝突，可重試
    #[error("交易序列化衝突")]
    SerializationConflict,

    /// 資料庫錯誤
    #[error("資料庫錯誤: {0}")]
    Database(sqlx::Error),

    /// 資料列內容無法轉換為模型
    #[error("資料內容損毀: {0}")]
    Corrupt(String),
}

impl VersionError {
    pub fn not_found(strategy: &str, version: &str) -> Self {
        VersionError::NotFound {
            strategy: strategy.to_string(),
            version: version.to_string(),
        }
    }

    pub fn invalid_transition(current: &StrategyVersion, to: VersionStatus) -> Self {
        VersionError::InvalidTransition {
            strategy: current.strategy_name.clone(),
            version: current.version.clone(),
            from: current.status,
            to,
        }
    }

    /// 是否為可重試的交易衝突
    pub fn is_retryable(&self) -> bool {
        matches!(self, VersionError::SerializationConflict)
    }
}

/// 依狀態機檢查目標版本能否轉為 `next`
///
/// 金絲雀重新設定比例視為合法；已退役版本的再次退役由呼叫端先行處理。
pub(crate) fn check_transition(current: &StrategyVersion, next: VersionStatus) -> Result<(), VersionError> {
    use VersionStatus::*;
    match (current.status, next) {
        (from, to) if from.can_transition_to(to) => Ok(()),
        (Canary, Canary) => Ok(()),
        (Active, Active) => Err(VersionError::AlreadyActive {
            strategy: current.strategy_name.clone(),
            version: current.version.clone(),
        }),
        (Active, Retired) => Err(VersionError::CannotRetireActive {
            strategy: current.strategy_name.clone(),
            version: current.version.clone(),
        }),
        _ => Err(VersionError::invalid_transition(current, next)),
    }
}

impl From<sqlx::Error> for VersionError {
    fn from(err: sqlx::Error) -> Self {
        if is_transaction_conflict(&err) {
            VersionError::SerializationConflict
        } else {
            VersionError::Database(err)
        }
    }
}

/// 策略版本倉庫特性
///
/// 所有會改變權威版本的操作都必須在單一交易內完成檢查與寫入，
/// 不可由呼叫端先讀後寫。
#[async_trait]
pub trait StrategyVersionRepository: Send + Sync {
    /// 創建新的策略版本
    async fn insert_version(&self, new: NewStrategyVersion) -> Result<StrategyVersion, VersionError>;

    /// 獲取指定策略版本
    async fn get_version(&self, strategy: &str, version: &str) -> Result<Option<StrategyVersion>, VersionError>;

    /// 獲取策略目前的 ACTIVE 版本
    async fn get_active_version(&self, strategy: &str) -> Result<Option<StrategyVersion>, VersionError>;

    /// 列出版本，依創建時間由新到舊
    async fn list_versions(
        &self,
        strategy: Option<&str>,
        status: Option<VersionStatus>,
    ) -> Result<Vec<StrategyVersion>, VersionError>;

    /// 原子地退役現有 ACTIVE 版本並啟用目標版本
    async fn activate_version(
        &self,
        strategy: &str,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, VersionError>;

    /// 將目標版本設為 CANARY 並建立或覆寫金絲雀配置
    async fn activate_canary(
        &self,
        strategy: &str,
        version: &str,
        rollout_percent: f64,
        now: DateTime<Utc>,
    ) -> Result<CanaryAssignment, VersionError>;

    /// 只覆寫金絲雀流量百分比
    async fn update_canary_percent(
        &self,
        strategy: &str,
        rollout_percent: f64,
        now: DateTime<Utc>,
    ) -> Result<CanaryConfig, VersionError>;

    /// 退役版本；已退役者原樣回傳且 `changed` 為 false
    async fn retire_version(
        &self,
        strategy: &str,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<RetirementOutcome, VersionError>;

    /// 獲取策略的金絲雀配置
    async fn get_canary_config(&self, strategy: &str) -> Result<Option<CanaryConfig>, VersionError>;

    /// 以單次讀取取得路由所需狀態
    async fn routing_snapshot(&self, strategy: &str) -> Result<RoutingSnapshot, VersionError>;
}

const VERSION_COLUMNS: &str = "id, strategy_name, version, status, config, description, created_by, \
     created_at, updated_at, activated_at, retired_at";

const CANARY_COLUMNS: &str = "strategy_name, version, rollout_percent, created_at, updated_at, started_at";

/// 策略版本資料列
#[derive(Debug, sqlx::FromRow)]
struct StrategyVersionRow {
    id: i64,
    strategy_name: String,
    version: String,
    status: String,
    config: Json<serde_json::Value>,
    description: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    activated_at: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
}

impl TryFrom<StrategyVersionRow> for StrategyVersion {
    type Error = VersionError;

    fn try_from(row: StrategyVersionRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<VersionStatus>().map_err(VersionError::Corrupt)?;
        Ok(StrategyVersion {
            id: row.id,
            strategy_name: row.strategy_name,
            version: row.version,
            status,
            config: row.config.0,
            description: row.description,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
            activated_at: row.activated_at,
            retired_at: row.retired_at,
        })
    }
}

/// 金絲雀配置資料列
#[derive(Debug, sqlx::FromRow)]
struct CanaryConfigRow {
    strategy_name: String,
    version: String,
    rollout_percent: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
}

impl From<CanaryConfigRow> for CanaryConfig {
    fn from(row: CanaryConfigRow) -> Self {
        CanaryConfig {
            strategy_name: row.strategy_name,
            version: row.version,
            rollout_percent: row.rollout_percent,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
        }
    }
}

/// 路由查詢資料列：ACTIVE/CANARY 版本及其關聯的金絲雀配置
#[derive(Debug, sqlx::FromRow)]
struct RoutingRow {
    #[sqlx(flatten)]
    version: StrategyVersionRow,
    canary_rollout_percent: Option<f64>,
    canary_created_at: Option<DateTime<Utc>>,
    canary_updated_at: Option<DateTime<Utc>>,
    canary_started_at: Option<DateTime<Utc>>,
}

/// PostgreSQL 實現的策略版本儲存庫
///
/// 每個寫入操作在一個 SERIALIZABLE 交易內先以 `pg_advisory_xact_lock` 取得策略級鎖，
/// 再以 `FOR UPDATE` 讀取相關列並寫入；部分唯一索引保證每個策略
/// 至多一個 ACTIVE 與一個 CANARY。
pub struct PgStrategyVersionRepository {
    /// 資料庫連接池
    pool: Arc<PgPool>,
}

impl PgStrategyVersionRepository {
    /// 創建新的 PostgreSQL 策略版本儲存庫
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// 開啟交易並鎖定策略
    async fn begin_locked(&self, strategy: &str) -> Result<Transaction<'static, Postgres>, VersionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(strategy)
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn lock_version(
        tx: &mut Transaction<'static, Postgres>,
        strategy: &str,
        version: &str,
    ) -> Result<Option<StrategyVersion>, VersionError> {
        let row: Option<StrategyVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM strategy_versions \
             WHERE strategy_name = $1 AND version = $2 FOR UPDATE"
        ))
        .bind(strategy)
        .bind(version)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(StrategyVersion::try_from).transpose()
    }

    async fn lock_by_status(
        tx: &mut Transaction<'static, Postgres>,
        strategy: &str,
        status: VersionStatus,
    ) -> Result<Option<StrategyVersion>, VersionError> {
        let row: Option<StrategyVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM strategy_versions \
             WHERE strategy_name = $1 AND status = $2 FOR UPDATE"
        ))
        .bind(strategy)
        .bind(status.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(StrategyVersion::try_from).transpose()
    }

    async fn set_status(
        tx: &mut Transaction<'static, Postgres>,
        id: i64,
        status: VersionStatus,
        now: DateTime<Utc>,
    ) -> Result<StrategyVersion, VersionError> {
        // activated_at / retired_at 只在進入對應狀態時設定
        let row: StrategyVersionRow = sqlx::query_as(&format!(
            "UPDATE strategy_versions SET \
                 status = $2, \
                 updated_at = $3, \
                 activated_at = CASE WHEN $2 = 'ACTIVE' THEN $3 ELSE activated_at END, \
                 retired_at = CASE WHEN $2 = 'RETIRED' THEN $3 ELSE retired_at END \
             WHERE id = $1 \
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        StrategyVersion::try_from(row)
    }

    async fn delete_canary_for(
        tx: &mut Transaction<'static, Postgres>,
        strategy: &str,
        version: &str,
    ) -> Result<bool, VersionError> {
        let result = sqlx::query("DELETE FROM canary_configs WHERE strategy_name = $1 AND version = $2")
            .bind(strategy)
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

impl DbExecutor for PgStrategyVersionRepository {
    fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StrategyVersionRepository for PgStrategyVersionRepository {
    async fn insert_version(&self, new: NewStrategyVersion) -> Result<StrategyVersion, VersionError> {
        let mut tx = self.begin_locked(&new.strategy_name).await?;

        if Self::lock_version(&mut tx, &new.strategy_name, &new.version).await?.is_some() {
            return Err(VersionError::AlreadyExists {
                strategy: new.strategy_name,
                version: new.version,
            });
        }
        if new.status == VersionStatus::Active
            && Self::lock_by_status(&mut tx, &new.strategy_name, VersionStatus::Active)
                .await?
                .is_some()
        {
            return Err(VersionError::ConflictingActive(new.strategy_name));
        }

        let now = Utc::now();
        let inserted: Result<StrategyVersionRow, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO strategy_versions ( \
                 strategy_name, version, status, config, description, created_by, \
                 created_at, updated_at, activated_at \
             ) VALUES ( \
                 $1, $2, $3, $4, $5, $6, $7, $7, CASE WHEN $3 = 'ACTIVE' THEN $7 END \
             ) \
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(&new.strategy_name)
        .bind(&new.version)
        .bind(new.status.as_str())
        .bind(Json(&new.config))
        .bind(&new.description)
        .bind(&new.created_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) => {
                return Err(match unique_violation(&err).as_deref() {
                    Some("uq_strategy_versions_key") => VersionError::AlreadyExists {
                        strategy: new.strategy_name,
                        version: new.version,
                    },
                    Some("uq_strategy_versions_one_active") => {
                        VersionError::ConflictingActive(new.strategy_name)
                    }
                    _ => VersionError::from(err),
                })
            }
        };

        tx.commit().await?;
        StrategyVersion::try_from(row)
    }

    async fn get_version(&self, strategy: &str, version: &str) -> Result<Option<StrategyVersion>, VersionError> {
        let row: Option<StrategyVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM strategy_versions WHERE strategy_name = $1 AND version = $2"
        ))
        .bind(strategy)
        .bind(version)
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        row.map(StrategyVersion::try_from).transpose()
    }

    async fn get_active_version(&self, strategy: &str) -> Result<Option<StrategyVersion>, VersionError> {
        let row: Option<StrategyVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM strategy_versions \
             WHERE strategy_name = $1 AND status = 'ACTIVE'"
        ))
        .bind(strategy)
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        row.map(StrategyVersion::try_from).transpose()
    }

    async fn list_versions(
        &self,
        strategy: Option<&str>,
        status: Option<VersionStatus>,
    ) -> Result<Vec<StrategyVersion>, VersionError> {
        let rows: Vec<StrategyVersionRow> = sqlx::query_as(&format!(
            "SELECT {VERSION_COLUMNS} FROM strategy_versions \
             WHERE ($1::TEXT IS NULL OR strategy_name = $1) \
               AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(strategy)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        rows.into_iter().map(StrategyVersion::try_from).collect()
    }

    async fn activate_version(
        &self,
        strategy: &str,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, VersionError> {
        let mut tx = self.begin_locked(strategy).await?;

        let target = Self::lock_version(&mut tx, strategy, version)
            .await?
            .ok_or_else(|| VersionError::not_found(strategy, version))?;

        check_transition(&target, VersionStatus::Active)?;

        // 先退役再啟用，每條語句結束時部分唯一索引都成立
        let retired = match Self::lock_by_status(&mut tx, strategy, VersionStatus::Active).await? {
            Some(current) => Some(Self::set_status(&mut tx, current.id, VersionStatus::Retired, now).await?),
            None => None,
        };
        let canary_cleared = Self::delete_canary_for(&mut tx, strategy, version).await?;
        let activated = Self::set_status(&mut tx, target.id, VersionStatus::Active, now).await?;

        tx.commit().await?;

        Ok(ActivationOutcome {
            activated,
            retired,
            canary_cleared,
        })
    }

    async fn activate_canary(
        &self,
        strategy: &str,
        version: &str,
        rollout_percent: f64,
        now: DateTime<Utc>,
    ) -> Result<CanaryAssignment, VersionError> {
        let mut tx = self.begin_locked(strategy).await?;

        let target = Self::lock_version(&mut tx, strategy, version)
            .await?
            .ok_or_else(|| VersionError::not_found(strategy, version))?;

        check_transition(&target, VersionStatus::Canary)?;

        let mut displaced = None;
        if target.status == VersionStatus::Shadow {
            if let Some(previous) = Self::lock_by_status(&mut tx, strategy, VersionStatus::Canary).await? {
                Self::delete_canary_for(&mut tx, strategy, &previous.version).await?;
                displaced = Some(Self::set_status(&mut tx, previous.id, VersionStatus::Retired, now).await?);
            }
        }

        let version_record = Self::set_status(&mut tx, target.id, VersionStatus::Canary, now).await?;

        // 同一版本重新設定時保留原本的 started_at
        let config: CanaryConfigRow = sqlx::query_as(&format!(
            "INSERT INTO canary_configs ( \
                 strategy_name, version, rollout_percent, created_at, updated_at, started_at \
             ) VALUES ($1, $2, $3, $4, $4, $4) \
             ON CONFLICT (strategy_name) DO UPDATE SET \
                 version = EXCLUDED.version, \
                 rollout_percent = EXCLUDED.rollout_percent, \
                 updated_at = EXCLUDED.updated_at, \
                 started_at = CASE WHEN canary_configs.version = EXCLUDED.version \
                                   THEN canary_configs.started_at \
                                   ELSE EXCLUDED.started_at END \
             RETURNING {CANARY_COLUMNS}"
        ))
        .bind(strategy)
        .bind(version)
        .bind(rollout_percent)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(CanaryAssignment {
            version: version_record,
            config: config.into(),
            displaced,
        })
    }

    async fn update_canary_percent(
        &self,
        strategy: &str,
        rollout_percent: f64,
        now: DateTime<Utc>,
    ) -> Result<CanaryConfig, VersionError> {
        let mut tx = self.begin_locked(strategy).await?;

        let row: Option<CanaryConfigRow> = sqlx::query_as(
            "UPDATE canary_configs c SET rollout_percent = $2, updated_at = $3 \
             FROM strategy_versions v \
             WHERE c.strategy_name = $1 \
               AND v.strategy_name = c.strategy_name \
               AND v.version = c.version \
               AND v.status = 'CANARY' \
             RETURNING c.strategy_name, c.version, c.rollout_percent, \
                       c.created_at, c.updated_at, c.started_at",
        )
        .bind(strategy)
        .bind(rollout_percent)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let row = row.ok_or_else(|| VersionError::NoActiveCanary(strategy.to_string()))?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn retire_version(
        &self,
        strategy: &str,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<RetirementOutcome, VersionError> {
        let mut tx = self.begin_locked(strategy).await?;

        let target = Self::lock_version(&mut tx, strategy, version)
            .await?
            .ok_or_else(|| VersionError::not_found(strategy, version))?;

        if target.status == VersionStatus::Retired {
            return Ok(RetirementOutcome {
                version: target,
                changed: false,
            });
        }
        check_transition(&target, VersionStatus::Retired)?;

        Self::delete_canary_for(&mut tx, strategy, version).await?;
        let retired = Self::set_status(&mut tx, target.id, VersionStatus::Retired, now).await?;

        tx.commit().await?;
        Ok(RetirementOutcome {
            version: retired,
            changed: true,
        })
    }

    async fn get_canary_config(&self, strategy: &str) -> Result<Option<CanaryConfig>, VersionError> {
        let row: Option<CanaryConfigRow> = sqlx::query_as(&format!(
            "SELECT {CANARY_COLUMNS} FROM canary_configs WHERE strategy_name = $1"
        ))
        .bind(strategy)
        .fetch_optional(DbExecutor::get_pool(self))
        .await?;

        Ok(row.map(CanaryConfig::from))
    }

    async fn routing_snapshot(&self, strategy: &str) -> Result<RoutingSnapshot, VersionError> {
        let rows: Vec<RoutingRow> = sqlx::query_as(
            "SELECT v.id, v.strategy_name, v.version, v.status, v.config, v.description, \
                    v.created_by, v.created_at, v.updated_at, v.activated_at, v.retired_at, \
                    c.rollout_percent AS canary_rollout_percent, \
                    c.created_at AS canary_created_at, \
                    c.updated_at AS canary_updated_at, \
                    c.started_at AS canary_started_at \
             FROM strategy_versions v \
             LEFT JOIN canary_configs c \
                    ON c.strategy_name = v.strategy_name AND c.version = v.version \
             WHERE v.strategy_name = $1 AND v.status IN ('ACTIVE', 'CANARY')",
        )
        .bind(strategy)
        .fetch_all(DbExecutor::get_pool(self))
        .await?;

        let mut snapshot = RoutingSnapshot::default();
        for row in rows {
            let version = StrategyVersion::try_from(row.version)?;
            match version.status {
                VersionStatus::Active => snapshot.active = Some(version),
                VersionStatus::Canary => {
                    snapshot.canary_config = match (
                        row.canary_rollout_percent,
                        row.canary_created_at,
                        row.canary_updated_at,
                        row.canary_started_at,
                    ) {
                        (Some(rollout_percent), Some(created_at), Some(updated_at), Some(started_at)) => {
                            Some(CanaryConfig {
                                strategy_name: version.strategy_name.clone(),
                                version: version.version.clone(),
                                rollout_percent,
                                created_at,
                                updated_at,
                                started_at,
                            })
                        }
                        _ => None,
                    };
                    snapshot.canary_version = Some(version);
                }
                VersionStatus::Shadow | VersionStatus::Retired => {}
            }
        }

        Ok(snapshot)
    }
}
