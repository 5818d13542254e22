//! 記憶體內的儲存庫實現
//!
//! 與 PostgreSQL 實現遵守相同契約，供測試與嵌入式使用。
//! 版本儲存庫以單一寫鎖包住每個轉換，鎖不會跨越 `.await`。

use crate::storage::error::StoreError;
use crate::storage::models::*;
use crate::storage::repository::production_decision::{
    AuditScope, ProductionDecisionReader, SideEffectAudit,
};
use crate::storage::repository::shadow_decision::ShadowDecisionRepository;
use crate::storage::repository::strategy_version::{
    check_transition, StrategyVersionRepository, VersionError,
};
use crate::storage::repository::TimeRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
struct VersionState {
    versions: Vec<StrategyVersion>,
    canaries: HashMap<String, CanaryConfig>,
    next_id: i64,
}

impl VersionState {
    fn position(&self, strategy: &str, version: &str) -> Option<usize> {
        self.versions
            .iter()
            .position(|v| v.strategy_name == strategy && v.version == version)
    }

    fn position_by_status(&self, strategy: &str, status: VersionStatus) -> Option<usize> {
        self.versions
            .iter()
            .position(|v| v.strategy_name == strategy && v.status == status)
    }

    fn find(&self, strategy: &str, version: &str) -> Result<usize, VersionError> {
        self.position(strategy, version)
            .ok_or_else(|| VersionError::not_found(strategy, version))
    }

    /// 刪除指向指定版本的金絲雀配置
    fn clear_canary_for(&mut self, strategy: &str, version: &str) -> bool {
        let points_here = self
            .canaries
            .get(strategy)
            .is_some_and(|c| c.version == version);
        if points_here {
            self.canaries.remove(strategy);
        }
        points_here
    }
}

/// 記憶體版本儲存庫
#[derive(Debug, Default)]
pub struct InMemoryStrategyVersionRepository {
    state: RwLock<VersionState>,
}

impl InMemoryStrategyVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrategyVersionRepository for InMemoryStrategyVersionRepository {
    async fn insert_version(&self, new: NewStrategyVersion) -> Result<StrategyVersion, VersionError> {
        let mut state = self.state.write();

        if state.position(&new.strategy_name, &new.version).is_some() {
            return Err(VersionError::AlreadyExists {
                strategy: new.strategy_name,
                version: new.version,
            });
        }
        if new.status == VersionStatus::Active
            && state
                .position_by_status(&new.strategy_name, VersionStatus::Active)
                .is_some()
        {
            return Err(VersionError::ConflictingActive(new.strategy_name));
        }

        state.next_id += 1;
        let now = Utc::now();
        let record = StrategyVersion {
            id: state.next_id,
            strategy_name: new.strategy_name,
            version: new.version,
            status: new.status,
            config: new.config,
            description: new.description,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            activated_at: (new.status == VersionStatus::Active).then_some(now),
            retired_at: None,
        };
        state.versions.push(record.clone());

        Ok(record)
    }

    async fn get_version(&self, strategy: &str, version: &str) -> Result<Option<StrategyVersion>, VersionError> {
        let state = self.state.read();
        Ok(state.position(strategy, version).map(|i| state.versions[i].clone()))
    }

    async fn get_active_version(&self, strategy: &str) -> Result<Option<StrategyVersion>, VersionError> {
        let state = self.state.read();
        Ok(state
            .position_by_status(strategy, VersionStatus::Active)
            .map(|i| state.versions[i].clone()))
    }

    async fn list_versions(
        &self,
        strategy: Option<&str>,
        status: Option<VersionStatus>,
    ) -> Result<Vec<StrategyVersion>, VersionError> {
        let mut versions: Vec<StrategyVersion> = self
            .state
            .read()
            .versions
            .iter()
            .filter(|v| strategy.map_or(true, |s| v.strategy_name == s))
            .filter(|v| status.map_or(true, |s| v.status == s))
            .cloned()
            .collect();

        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(versions)
    }

    async fn activate_version(
        &self,
        strategy: &str,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, VersionError> {
        let mut state = self.state.write();
        let target = state.find(strategy, version)?;
        check_transition(&state.versions[target], VersionStatus::Active)?;

        let retired = state
            .position_by_status(strategy, VersionStatus::Active)
            .map(|current| {
                state.versions[current].mark_retired(now);
                state.versions[current].clone()
            });
        let canary_cleared = state.clear_canary_for(strategy, version);
        state.versions[target].mark_active(now);

        Ok(ActivationOutcome {
            activated: state.versions[target].clone(),
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
        let mut state = self.state.write();
        let target = state.find(strategy, version)?;
        let current_status = state.versions[target].status;
        check_transition(&state.versions[target], VersionStatus::Canary)?;

        let mut displaced = None;
        if current_status == VersionStatus::Shadow {
            if let Some(previous) = state.position_by_status(strategy, VersionStatus::Canary) {
                let previous_version = state.versions[previous].version.clone();
                state.clear_canary_for(strategy, &previous_version);
                state.versions[previous].mark_retired(now);
                displaced = Some(state.versions[previous].clone());
            }
        }

        state.versions[target].mark_canary(now);

        let config = match state.canaries.get(strategy) {
            Some(existing) if existing.version == version => CanaryConfig {
                rollout_percent,
                updated_at: now,
                ..existing.clone()
            },
            _ => CanaryConfig {
                strategy_name: strategy.to_string(),
                version: version.to_string(),
                rollout_percent,
                created_at: now,
                updated_at: now,
                started_at: now,
            },
        };
        state.canaries.insert(strategy.to_string(), config.clone());

        Ok(CanaryAssignment {
            version: state.versions[target].clone(),
            config,
            displaced,
        })
    }

    async fn update_canary_percent(
        &self,
        strategy: &str,
        rollout_percent: f64,
        now: DateTime<Utc>,
    ) -> Result<CanaryConfig, VersionError> {
        let mut state = self.state.write();

        let canary_version = state
            .canaries
            .get(strategy)
            .map(|c| c.version.clone())
            .ok_or_else(|| VersionError::NoActiveCanary(strategy.to_string()))?;
        let is_canary = state
            .position(strategy, &canary_version)
            .is_some_and(|i| state.versions[i].status == VersionStatus::Canary);
        if !is_canary {
            return Err(VersionError::NoActiveCanary(strategy.to_string()));
        }

        let config = state
            .canaries
            .get_mut(strategy)
            .ok_or_else(|| VersionError::NoActiveCanary(strategy.to_string()))?;
        config.rollout_percent = rollout_percent;
        config.updated_at = now;

        Ok(config.clone())
    }

    async fn retire_version(
        &self,
        strategy: &str,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<RetirementOutcome, VersionError> {
        let mut state = self.state.write();
        let target = state.find(strategy, version)?;

        if state.versions[target].status == VersionStatus::Retired {
            return Ok(RetirementOutcome {
                version: state.versions[target].clone(),
                changed: false,
            });
        }
        check_transition(&state.versions[target], VersionStatus::Retired)?;

        state.clear_canary_for(strategy, version);
        state.versions[target].mark_retired(now);

        Ok(RetirementOutcome {
            version: state.versions[target].clone(),
            changed: true,
        })
    }

    async fn get_canary_config(&self, strategy: &str) -> Result<Option<CanaryConfig>, VersionError> {
        Ok(self.state.read().canaries.get(strategy).cloned())
    }

    async fn routing_snapshot(&self, strategy: &str) -> Result<RoutingSnapshot, VersionError> {
        let state = self.state.read();
        let pick = |status| {
            state
                .position_by_status(strategy, status)
                .map(|i| state.versions[i].clone())
        };

        Ok(RoutingSnapshot {
            active: pick(VersionStatus::Active),
            canary_version: pick(VersionStatus::Canary),
            canary_config: state.canaries.get(strategy).cloned(),
        })
    }
}

/// 記憶體影子決策儲存庫
#[derive(Debug, Default)]
pub struct InMemoryShadowDecisionRepository {
    logs: DashMap<i64, ShadowDecisionLog>,
    next_id: AtomicI64,
}

impl InMemoryShadowDecisionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已寫入的紀錄數量
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    fn collect<F>(&self, predicate: F) -> Vec<ShadowDecisionLog>
    where
        F: Fn(&ShadowDecisionLog) -> bool,
    {
        self.logs
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl ShadowDecisionRepository for InMemoryShadowDecisionRepository {
    async fn append(&self, log: ShadowDecisionInsert) -> Result<ShadowDecisionLog, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ShadowDecisionLog {
            id,
            version: log.version,
            strategy_name: log.strategy_name,
            symbol: log.symbol,
            timestamp: log.timestamp,
            decision: log.decision,
            features: log.features,
            confidence: log.confidence,
            metadata: log.metadata,
            created_at: Utc::now(),
        };
        self.logs.insert(id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ShadowDecisionLog>, StoreError> {
        Ok(self.logs.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list(
        &self,
        strategy: &str,
        version: &str,
        filter: &ShadowDecisionFilter,
    ) -> Result<Vec<ShadowDecisionLog>, StoreError> {
        let mut logs = self.collect(|log| {
            log.strategy_name == strategy && log.version == version && filter.matches(log)
        });
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        if let Some(limit) = filter.limit {
            logs.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(logs)
    }

    async fn count_by_decision(
        &self,
        strategy: &str,
        version: &str,
        symbol: &str,
        range: TimeRange,
    ) -> Result<DecisionCounts, StoreError> {
        Ok(self
            .collect(|log| {
                log.strategy_name == strategy
                    && log.version == version
                    && log.symbol == symbol
                    && range.contains(log.timestamp)
            })
            .into_iter()
            .map(|log| log.decision)
            .collect())
    }
}

/// 正式路徑的副作用紀錄
#[derive(Debug, Clone, PartialEq)]
pub struct SideEffectRecord {
    pub strategy_name: String,
    pub version: String,
    pub symbol: String,
    pub created_at: DateTime<Utc>,
}

impl SideEffectRecord {
    fn in_scope(&self, scope: &AuditScope) -> bool {
        self.strategy_name == scope.strategy_name
            && self.version == scope.version
            && self.symbol == scope.symbol
            && scope.range.contains(self.created_at)
    }
}

#[derive(Debug, Default)]
struct ProductionState {
    decisions: Vec<ProductionDecision>,
    signals: Vec<SideEffectRecord>,
    trades: Vec<SideEffectRecord>,
    notifications: Vec<SideEffectRecord>,
}

/// 記憶體正式決策儲存
///
/// 代表正式交易管線寫入的資料；影子引擎只透過唯讀特徵存取。
#[derive(Debug, Default)]
pub struct InMemoryProductionStore {
    state: RwLock<ProductionState>,
}

impl InMemoryProductionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 寫入一筆正式決策並回傳其 ID
    pub fn record_decision(
        &self,
        strategy: &str,
        symbol: &str,
        timestamp: DateTime<Utc>,
        outcome: DecisionOutcome,
        features: serde_json::Value,
    ) -> i64 {
        let mut state = self.state.write();
        let id = state.decisions.len() as i64 + 1;
        state.decisions.push(ProductionDecision {
            id,
            strategy_name: strategy.to_string(),
            symbol: symbol.to_string(),
            timestamp,
            outcome,
            features,
        });
        id
    }

    pub fn record_signal(&self, record: SideEffectRecord) {
        self.state.write().signals.push(record);
    }

    pub fn record_trade(&self, record: SideEffectRecord) {
        self.state.write().trades.push(record);
    }

    pub fn record_notification(&self, record: SideEffectRecord) {
        self.state.write().notifications.push(record);
    }

    /// 所有正式資料列的總數（決策、訊號、交易、通知）
    pub fn total_rows(&self) -> usize {
        let state = self.state.read();
        state.decisions.len() + state.signals.len() + state.trades.len() + state.notifications.len()
    }
}

#[async_trait]
impl ProductionDecisionReader for InMemoryProductionStore {
    async fn list_decisions(
        &self,
        strategy: &str,
        filter: &ProductionDecisionFilter,
    ) -> Result<Vec<ProductionDecision>, StoreError> {
        let mut decisions: Vec<ProductionDecision> = self
            .state
            .read()
            .decisions
            .iter()
            .filter(|d| d.strategy_name == strategy && filter.matches(d))
            .cloned()
            .collect();
        decisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(decisions)
    }
}

#[async_trait]
impl SideEffectAudit for InMemoryProductionStore {
    async fn count_published_signals(&self, scope: &AuditScope) -> Result<i64, StoreError> {
        Ok(self.state.read().signals.iter().filter(|r| r.in_scope(scope)).count() as i64)
    }

    async fn count_executed_trades(&self, scope: &AuditScope) -> Result<i64, StoreError> {
        Ok(self.state.read().trades.iter().filter(|r| r.in_scope(scope)).count() as i64)
    }

    async fn count_sent_notifications(&self, scope: &AuditScope) -> Result<i64, StoreError> {
        Ok(self
            .state
            .read()
            .notifications
            .iter()
            .filter(|r| r.in_scope(scope))
            .count() as i64)
    }
}
