use crate::config::{ConfigManager, RegistryConfig};
use crate::monitor::metrics::{RolloutMetrics, RouteTarget};
use crate::registry::error::RegistryError;
use crate::registry::routing::{routing_fingerprint, select_version, stable_bucket, RouteDecision};
use crate::storage::models::*;
use crate::storage::repository::{StrategyVersionRepository, VersionError};
use chrono::Utc;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// 策略版本註冊表
///
/// 管理版本生命週期、金絲雀分流與使用者路由。
/// 所有狀態都在儲存庫中，本身不持有可變狀態，可安全地跨任務共享。
/// 每個操作開始時從 `ConfigManager` 取一次配置快照，執行期的配置更新
/// 會在下一個操作生效。
#[derive(Clone)]
pub struct VersionRegistry {
    repo: Arc<dyn StrategyVersionRepository>,
    config: ConfigManager,
}

impl VersionRegistry {
    pub fn new(repo: Arc<dyn StrategyVersionRepository>, config: ConfigManager) -> Self {
        Self { repo, config }
    }

    /// 目前生效的註冊表配置
    pub fn config(&self) -> RegistryConfig {
        self.config.registry()
    }

    /// 註冊新版本
    ///
    /// 初始狀態只能是 SHADOW 或 ACTIVE。
    pub async fn register_version(
        &self,
        strategy: &str,
        version: &str,
        config: serde_json::Value,
        initial_status: VersionStatus,
    ) -> Result<StrategyVersion, RegistryError> {
        self.register(NewStrategyVersion::new(strategy, version, config, initial_status))
            .await
    }

    /// 以完整插入模型註冊新版本
    #[instrument(skip(self, new), fields(strategy = %new.strategy_name, version = %new.version, status = %new.status))]
    pub async fn register(&self, new: NewStrategyVersion) -> Result<StrategyVersion, RegistryError> {
        if !matches!(new.status, VersionStatus::Shadow | VersionStatus::Active) {
            warn!("拒絕註冊：初始狀態必須是 SHADOW 或 ACTIVE");
            return Err(RegistryError::InvalidTransition {
                strategy: new.strategy_name,
                version: new.version,
                from: VersionStatus::Shadow,
                to: new.status,
            });
        }

        let created = self
            .with_retry("register", || self.repo.insert_version(new.clone()))
            .await
            .inspect_err(|err| warn!("版本註冊失敗: {}", err))?;

        RolloutMetrics::record_registered(created.status.as_str());
        info!(id = created.id, "版本已註冊");
        Ok(created)
    }

    pub async fn get_version(
        &self,
        strategy: &str,
        version: &str,
    ) -> Result<Option<StrategyVersion>, RegistryError> {
        Ok(self.repo.get_version(strategy, version).await?)
    }

    pub async fn get_active_version(&self, strategy: &str) -> Result<Option<StrategyVersion>, RegistryError> {
        Ok(self.repo.get_active_version(strategy).await?)
    }

    /// 列出策略的 SHADOW 版本，新到舊
    pub async fn list_shadow_versions(&self, strategy: &str) -> Result<Vec<StrategyVersion>, RegistryError> {
        Ok(self
            .repo
            .list_versions(Some(strategy), Some(VersionStatus::Shadow))
            .await?)
    }

    /// 列出所有版本（可依策略過濾），新到舊
    pub async fn list_all_versions(&self, strategy: Option<&str>) -> Result<Vec<StrategyVersion>, RegistryError> {
        Ok(self.repo.list_versions(strategy, None).await?)
    }

    pub async fn get_canary_config(&self, strategy: &str) -> Result<Option<CanaryConfig>, RegistryError> {
        Ok(self.repo.get_canary_config(strategy).await?)
    }

    /// 啟用版本
    ///
    /// 前一個 ACTIVE 版本的退役與目標的啟用在同一交易完成。
    #[instrument(skip(self))]
    pub async fn activate_version(&self, strategy: &str, version: &str) -> Result<ActivationOutcome, RegistryError> {
        let outcome = self
            .with_retry("activate", || self.repo.activate_version(strategy, version, Utc::now()))
            .await
            .inspect_err(|err| warn!("版本啟用失敗: {}", err))?;

        RolloutMetrics::record_activated(outcome.canary_cleared);
        if let Some(retired) = &outcome.retired {
            RolloutMetrics::record_retired("replaced");
            info!(previous = %retired.version, "前一個 ACTIVE 版本已退役");
        }
        info!(canary_cleared = outcome.canary_cleared, "版本已啟用");
        Ok(outcome)
    }

    /// 將版本設為金絲雀並指定流量百分比
    #[instrument(skip(self))]
    pub async fn activate_canary(
        &self,
        strategy: &str,
        version: &str,
        rollout_percent: f64,
    ) -> Result<CanaryAssignment, RegistryError> {
        check_percent(rollout_percent)?;

        let assignment = self
            .with_retry("canary", || {
                self.repo
                    .activate_canary(strategy, version, rollout_percent, Utc::now())
            })
            .await
            .inspect_err(|err| warn!("金絲雀設定失敗: {}", err))?;

        if let Some(displaced) = &assignment.displaced {
            RolloutMetrics::record_retired("displaced");
            info!(previous = %displaced.version, "前一個金絲雀版本已被取代並退役");
        }
        RolloutMetrics::record_canary_percent_changed();
        info!("金絲雀已設定");
        Ok(assignment)
    }

    /// 以預設百分比設定金絲雀
    pub async fn activate_canary_default(
        &self,
        strategy: &str,
        version: &str,
    ) -> Result<CanaryAssignment, RegistryError> {
        let percent = self.config.registry().default_canary_percent;
        self.activate_canary(strategy, version, percent).await
    }

    /// 調整金絲雀流量百分比
    #[instrument(skip(self))]
    pub async fn update_canary_percent(
        &self,
        strategy: &str,
        rollout_percent: f64,
    ) -> Result<CanaryConfig, RegistryError> {
        check_percent(rollout_percent)?;

        let config = self
            .with_retry("canary_percent", || {
                self.repo
                    .update_canary_percent(strategy, rollout_percent, Utc::now())
            })
            .await
            .inspect_err(|err| warn!("金絲雀比例調整失敗: {}", err))?;

        RolloutMetrics::record_canary_percent_changed();
        info!(version = %config.version, "金絲雀比例已更新");
        Ok(config)
    }

    /// 退役版本；已退役的版本原樣回傳
    #[instrument(skip(self))]
    pub async fn retire_version(&self, strategy: &str, version: &str) -> Result<StrategyVersion, RegistryError> {
        let outcome = self
            .with_retry("retire", || self.repo.retire_version(strategy, version, Utc::now()))
            .await
            .inspect_err(|err| warn!("版本退役失敗: {}", err))?;

        if outcome.changed {
            RolloutMetrics::record_retired("manual");
            info!("版本已退役");
        } else {
            debug!("版本早已退役");
        }
        Ok(outcome.version)
    }

    /// 將路由鍵確定性地分配到一個版本
    ///
    /// 只讀取一次儲存，不寫入任何狀態。
    #[instrument(skip(self, user_key), fields(key = %routing_fingerprint(user_key)))]
    pub async fn route_user(&self, user_key: &str, strategy: &str) -> Result<RouteDecision, RegistryError> {
        let snapshot = self.repo.routing_snapshot(strategy).await?;
        let bucket = stable_bucket(user_key);

        match select_version(&snapshot, bucket) {
            Some(decision) => {
                let target = if decision.via_canary {
                    RouteTarget::Canary
                } else {
                    RouteTarget::Active
                };
                RolloutMetrics::record_route(target);
                debug!(bucket, version = %decision.version.version, target = target.as_str(), "路由完成");
                Ok(decision)
            }
            None => {
                RolloutMetrics::record_route(RouteTarget::Unavailable);
                warn!(bucket, "沒有可用版本，拒絕路由");
                Err(RegistryError::NoActiveVersion(strategy.to_string()))
            }
        }
    }

    /// 交易衝突時以指數退避加抖動重試
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T, RegistryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, VersionError>>,
    {
        let config = self.config.registry();
        let max_attempts = config.max_activation_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = jittered_backoff(&config, attempt - 1);
                    RolloutMetrics::record_conflict_retry(operation);
                    warn!(
                        "{} 發生交易衝突 (嘗試 {}/{})，{:?} 後重試",
                        operation, attempt, max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn jittered_backoff(config: &RegistryConfig, attempt: u32) -> Duration {
    let base = config.backoff_for(attempt);
    let jitter_cap = (base.as_millis() as u64 / 2).max(1);
    base + Duration::from_millis(rand::rng().random_range(0..=jitter_cap))
}

fn check_percent(rollout_percent: f64) -> Result<(), RegistryError> {
    if (0.0..=100.0).contains(&rollout_percent) {
        Ok(())
    } else {
        warn!(rollout_percent, "流量百分比超出範圍");
        Err(RegistryError::InvalidRange(rollout_percent))
    }
}
