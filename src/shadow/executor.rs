use crate::config::{ConfigManager, ShadowConfig};
use crate::monitor::metrics::RolloutMetrics;
use crate::shadow::comparison::ComparisonReport;
use crate::shadow::error::ShadowError;
use crate::shadow::isolation::{IsolationCheck, IsolationCheckKind, IsolationReport};
use crate::shadow::types::{Candidate, DecisionContext, DecisionFunction};
use crate::storage::models::*;
use crate::storage::repository::{
    AuditScope, ProductionDecisionReader, ShadowDecisionRepository, SideEffectAudit, TimeRange,
};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 空候選列表時紀錄的原因
pub const NO_SIGNAL_REASON: &str = "no signal";

/// 一次影子週期的結果統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowCycleSummary {
    /// 成功寫入的紀錄數
    pub recorded: usize,
    /// 決策函數失敗、逾時或寫入失敗
    pub failed: usize,
    /// 非 SHADOW / CANARY 而略過的版本數
    pub skipped: usize,
}

/// 影子執行引擎
///
/// 只持有影子紀錄儲存、正式決策讀取端與副作用稽核讀取端，
/// 型別上沒有任何發布、下單或通知的能力。
/// 配置每次操作時從 `ConfigManager` 讀取。
pub struct ShadowExecutor {
    shadow_repo: Arc<dyn ShadowDecisionRepository>,
    production: Arc<dyn ProductionDecisionReader>,
    audit: Arc<dyn SideEffectAudit>,
    config: ConfigManager,
}

impl ShadowExecutor {
    pub fn new(
        shadow_repo: Arc<dyn ShadowDecisionRepository>,
        production: Arc<dyn ProductionDecisionReader>,
        audit: Arc<dyn SideEffectAudit>,
        config: ConfigManager,
    ) -> Self {
        Self {
            shadow_repo,
            production,
            audit,
            config,
        }
    }

    /// 目前生效的影子執行配置
    pub fn config(&self) -> ShadowConfig {
        self.config.shadow()
    }

    /// 以影子模式執行一次決策
    ///
    /// 取第一個候選並寫入恰好一筆影子紀錄；決策函數失敗、逾時或寫入失敗時
    /// 記錄診斷並回傳 `None`，不會重試也不會留下部分紀錄。
    #[instrument(
        skip(self, version, decision_fn, context),
        fields(strategy = %version.strategy_name, version = %version.version)
    )]
    pub async fn execute_shadow(
        &self,
        version: &StrategyVersion,
        decision_fn: &dyn DecisionFunction,
        context: &DecisionContext,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<ShadowDecisionLog> {
        let candidates = match self
            .evaluate(version, decision_fn, context, symbol, timestamp)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                RolloutMetrics::record_shadow_failure(err.reason());
                error!("影子決策失敗，未產生紀錄: {}", err);
                return None;
            }
        };

        let insert = build_insert(version, symbol, timestamp, &candidates);
        let decision = insert.decision;

        match self.shadow_repo.append(insert).await {
            Ok(log) => {
                RolloutMetrics::record_shadow_decision(decision);
                info!(id = log.id, decision = %decision, candidates = candidates.len(), "影子決策已記錄");
                Some(log)
            }
            Err(err) => {
                let err = ShadowError::from(err);
                RolloutMetrics::record_shadow_failure(err.reason());
                error!("影子決策寫入失敗: {}", err);
                None
            }
        }
    }

    async fn evaluate(
        &self,
        version: &StrategyVersion,
        decision_fn: &dyn DecisionFunction,
        context: &DecisionContext,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, ShadowError> {
        let call = decision_fn.decide(context, symbol, timestamp, &version.config);

        let result = match self.config.shadow().decision_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ShadowError::DecisionTimeout(limit))?,
            None => call.await,
        };

        result.map_err(ShadowError::DecisionFunction)
    }

    /// 對每個 (版本, 標的) 組合執行影子決策
    ///
    /// 同時執行數量受 `max_parallel_evaluations` 限制，單一組合失敗不影響其他組合。
    #[instrument(skip_all, fields(versions = versions.len(), symbols = symbols.len()))]
    pub async fn run_shadow_cycle(
        &self,
        versions: &[StrategyVersion],
        decision_fn: &dyn DecisionFunction,
        context: &DecisionContext,
        symbols: &[&str],
        timestamp: DateTime<Utc>,
    ) -> ShadowCycleSummary {
        let (eligible, ineligible): (Vec<&StrategyVersion>, Vec<&StrategyVersion>) =
            versions.iter().partition(|v| v.is_shadow_eligible());

        for version in &ineligible {
            debug!(version = %version.version, status = %version.status, "略過非影子版本");
        }

        let jobs = eligible
            .iter()
            .flat_map(|version| symbols.iter().map(move |symbol| (*version, *symbol)));

        let parallelism = self.config.shadow().max_parallel_evaluations.max(1);
        let outcomes: Vec<bool> = stream::iter(jobs)
            .map(move |(version, symbol)| async move {
                self.execute_shadow(version, decision_fn, context, symbol, timestamp)
                    .await
                    .is_some()
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let recorded = outcomes.iter().filter(|ok| **ok).count();
        let summary = ShadowCycleSummary {
            recorded,
            failed: outcomes.len() - recorded,
            skipped: ineligible.len(),
        };

        if summary.failed > 0 {
            warn!(?summary, "影子週期完成，部分評估失敗");
        } else {
            info!(?summary, "影子週期完成");
        }
        summary
    }

    /// 查詢影子決策，時間由新到舊
    pub async fn get_shadow_decisions(
        &self,
        version: &str,
        strategy: &str,
        symbol: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ShadowDecisionLog>, ShadowError> {
        let filter = ShadowDecisionFilter {
            symbol: symbol.map(str::to_string),
            start_time: start,
            end_time: end,
            limit: None,
        };
        Ok(self.shadow_repo.list(strategy, version, &filter).await?)
    }

    /// 查詢正式決策，時間由新到舊
    pub async fn get_active_decisions(
        &self,
        strategy: &str,
        symbol: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProductionDecision>, ShadowError> {
        let filter = ProductionDecisionFilter {
            symbol: symbol.map(str::to_string),
            start_time: start,
            end_time: end,
        };
        Ok(self.production.list_decisions(strategy, &filter).await?)
    }

    /// 比較影子版本與正式版本在 `[now - window_days, now]` 的決策量
    pub async fn compare_shadow_vs_active(
        &self,
        shadow_version: &str,
        strategy: &str,
        symbol: &str,
        window_days: u32,
    ) -> Result<ComparisonReport, ShadowError> {
        self.compare_in_range(
            shadow_version,
            strategy,
            symbol,
            window_days,
            TimeRange::last_days(Utc::now(), window_days),
        )
        .await
    }

    /// 以配置的預設窗口比較
    pub async fn compare_default_window(
        &self,
        shadow_version: &str,
        strategy: &str,
        symbol: &str,
    ) -> Result<ComparisonReport, ShadowError> {
        let window_days = self.config.shadow().default_window_days;
        self.compare_shadow_vs_active(shadow_version, strategy, symbol, window_days)
            .await
    }

    #[instrument(skip(self))]
    pub async fn compare_in_range(
        &self,
        shadow_version: &str,
        strategy: &str,
        symbol: &str,
        window_days: u32,
        range: TimeRange,
    ) -> Result<ComparisonReport, ShadowError> {
        let shadow = self
            .shadow_repo
            .count_by_decision(strategy, shadow_version, symbol, range)
            .await?;

        let active: DecisionCounts = self
            .get_active_decisions(strategy, Some(symbol), Some(range.start), Some(range.end))
            .await?
            .iter()
            .map(ProductionDecision::as_decision)
            .collect();

        let report = ComparisonReport::new(strategy, shadow_version, symbol, window_days, range, shadow, active);
        info!(
            divergence_count = report.divergence_count,
            divergence_rate = report.divergence_rate,
            "影子與正式決策比較完成"
        );
        Ok(report)
    }

    /// 驗證影子紀錄的隔離性
    ///
    /// 每項檢查獨立回報；未通過者各自記錄遙測與警告。
    #[instrument(skip(self))]
    pub async fn validate_isolation(&self, shadow_log_id: i64) -> Result<IsolationReport, ShadowError> {
        let log = self
            .shadow_repo
            .get_by_id(shadow_log_id)
            .await?
            .ok_or(ShadowError::NotFound(shadow_log_id))?;

        let radius = Duration::seconds(self.config.shadow().isolation_window_secs.min(86_400) as i64);
        let scope = AuditScope {
            strategy_name: log.strategy_name.clone(),
            version: log.version.clone(),
            symbol: log.symbol.clone(),
            range: TimeRange::around(log.timestamp, radius),
        };

        let checks = vec![
            IsolationCheck::flag(IsolationCheckKind::ShadowFlagRecorded, log.has_shadow_flag()),
            IsolationCheck::from_count(
                IsolationCheckKind::NoSignalPublished,
                self.audit.count_published_signals(&scope).await?,
            ),
            IsolationCheck::from_count(
                IsolationCheckKind::NoTradeExecuted,
                self.audit.count_executed_trades(&scope).await?,
            ),
            IsolationCheck::from_count(
                IsolationCheckKind::NoNotificationSent,
                self.audit.count_sent_notifications(&scope).await?,
            ),
        ];

        for check in checks.iter().filter(|c| !c.passed) {
            RolloutMetrics::record_isolation_failure(check.kind.as_str());
            warn!(check = %check.kind, observed = check.observed, "影子隔離檢查未通過");
        }

        Ok(IsolationReport {
            shadow_log_id,
            strategy_name: log.strategy_name,
            version: log.version,
            symbol: log.symbol,
            timestamp: log.timestamp,
            checks,
        })
    }
}

/// 由候選列表建立影子紀錄，只取第一個候選
fn build_insert(
    version: &StrategyVersion,
    symbol: &str,
    timestamp: DateTime<Utc>,
    candidates: &[Candidate],
) -> ShadowDecisionInsert {
    let (decision, features, confidence, metadata) = match candidates.first() {
        Some(first) => (
            first.side.to_decision(),
            first.feature_snapshot(),
            first.normalized_confidence(),
            json!({SHADOW_MODE_KEY: true, "candidate_count": candidates.len()}),
        ),
        None => (
            Decision::Hold,
            json!({}),
            None,
            json!({SHADOW_MODE_KEY: true, "candidate_count": 0, "reason": NO_SIGNAL_REASON}),
        ),
    };

    ShadowDecisionInsert {
        version: version.version.clone(),
        strategy_name: version.strategy_name.clone(),
        symbol: symbol.to_string(),
        timestamp,
        decision,
        features,
        confidence,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::shadow::types::{FnDecision, Side};
    use crate::storage::error::StoreError;
    use crate::storage::repository::{InMemoryProductionStore, InMemoryShadowDecisionRepository};
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::always;
    use serde_json::Value;

    mock! {
        pub Audit {}

        #[async_trait]
        impl SideEffectAudit for Audit {
            async fn count_published_signals(&self, scope: &AuditScope) -> Result<i64, StoreError>;
            async fn count_executed_trades(&self, scope: &AuditScope) -> Result<i64, StoreError>;
            async fn count_sent_notifications(&self, scope: &AuditScope) -> Result<i64, StoreError>;
        }
    }

    fn shadow_version() -> StrategyVersion {
        let now = Utc::now();
        StrategyVersion {
            id: 2,
            strategy_name: "fib_rsi".to_string(),
            version: "v2".to_string(),
            status: VersionStatus::Shadow,
            config: json!({"rsi_period": 14}),
            description: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            activated_at: None,
            retired_at: None,
        }
    }

    fn executor_with(
        shadow_repo: Arc<InMemoryShadowDecisionRepository>,
        audit: Arc<dyn SideEffectAudit>,
        config: ShadowConfig,
    ) -> ShadowExecutor {
        let config = ConfigManager::with_sections(RegistryConfig::default(), config).unwrap();
        ShadowExecutor::new(shadow_repo, Arc::new(InMemoryProductionStore::new()), audit, config)
    }

    fn decide_with(
        candidates: Vec<Candidate>,
    ) -> FnDecision<impl Fn(&DecisionContext, &str, DateTime<Utc>, &Value) -> anyhow::Result<Vec<Candidate>>> {
        FnDecision(move |_: &DecisionContext, _: &str, _: DateTime<Utc>, _: &Value| Ok(candidates.clone()))
    }

    #[tokio::test]
    async fn test_first_candidate_wins() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let executor = executor_with(repo.clone(), Arc::new(InMemoryProductionStore::new()), ShadowConfig::default());
        let decision_fn = decide_with(vec![
            Candidate::new(Side::Short).with_levels(100.0, Some(102.0), Some(95.0)).with_confidence(0.8),
            Candidate::new(Side::Long),
        ]);

        let log = executor
            .execute_shadow(&shadow_version(), &decision_fn, &DecisionContext::default(), "BTCUSDT", Utc::now())
            .await
            .unwrap();

        assert_eq!(log.decision, Decision::Sell);
        assert_eq!(log.confidence, Some(0.8));
        assert_eq!(log.features["take_profit"], json!(95.0));
        assert_eq!(log.metadata["candidate_count"], json!(2));
        assert!(log.has_shadow_flag());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_candidates_record_hold_with_reason() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let executor = executor_with(repo.clone(), Arc::new(InMemoryProductionStore::new()), ShadowConfig::default());

        let log = executor
            .execute_shadow(&shadow_version(), &decide_with(vec![]), &DecisionContext::default(), "ETHUSDT", Utc::now())
            .await
            .unwrap();

        assert_eq!(log.decision, Decision::Hold);
        assert_eq!(log.metadata["reason"], json!(NO_SIGNAL_REASON));
        assert_eq!(log.confidence, None);
    }

    #[tokio::test]
    async fn test_decision_error_writes_nothing() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let executor = executor_with(repo.clone(), Arc::new(InMemoryProductionStore::new()), ShadowConfig::default());
        let failing = FnDecision(|_: &DecisionContext, _: &str, _: DateTime<Utc>, _: &Value| {
            Err::<Vec<Candidate>, _>(anyhow::anyhow!("指標資料不足"))
        });

        let result = executor
            .execute_shadow(&shadow_version(), &failing, &DecisionContext::default(), "BTCUSDT", Utc::now())
            .await;

        assert!(result.is_none());
        assert!(repo.is_empty());
    }

    struct SlowDecision;

    #[async_trait]
    impl DecisionFunction for SlowDecision {
        async fn decide(
            &self,
            _context: &DecisionContext,
            _symbol: &str,
            _timestamp: DateTime<Utc>,
            _config: &Value,
        ) -> anyhow::Result<Vec<Candidate>> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(vec![Candidate::new(Side::Long)])
        }
    }

    #[tokio::test]
    async fn test_decision_timeout_writes_nothing() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let config = ShadowConfig {
            decision_timeout_ms: 50,
            ..ShadowConfig::default()
        };
        let executor = executor_with(repo.clone(), Arc::new(InMemoryProductionStore::new()), config);

        let result = executor
            .execute_shadow(&shadow_version(), &SlowDecision, &DecisionContext::default(), "BTCUSDT", Utc::now())
            .await;

        assert!(result.is_none());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_default_window_comes_from_config() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let config = ShadowConfig {
            default_window_days: 3,
            ..ShadowConfig::default()
        };
        let executor = executor_with(repo.clone(), Arc::new(InMemoryProductionStore::new()), config);
        let now = Utc::now();
        for days in [1, 5] {
            executor
                .execute_shadow(
                    &shadow_version(),
                    &decide_with(vec![Candidate::new(Side::Long)]),
                    &DecisionContext::default(),
                    "BTCUSDT",
                    now - Duration::days(days),
                )
                .await
                .unwrap();
        }

        let report = executor.compare_default_window("v2", "fib_rsi", "BTCUSDT").await.unwrap();

        assert_eq!(report.window_days, 3);
        assert_eq!(report.shadow.buy, 1);
    }

    #[tokio::test]
    async fn test_timeout_update_applies_to_next_execution() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let production = Arc::new(InMemoryProductionStore::new());
        let config = ConfigManager::default();
        let executor = ShadowExecutor::new(repo.clone(), production.clone(), production, config.clone());
        assert_eq!(executor.config().decision_timeout(), None);

        config.update(|cfg| cfg.shadow.decision_timeout_ms = 50).unwrap();

        let result = executor
            .execute_shadow(&shadow_version(), &SlowDecision, &DecisionContext::default(), "BTCUSDT", Utc::now())
            .await;
        assert!(result.is_none());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_validate_isolation_reports_each_check() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let mut audit = MockAudit::new();
        audit.expect_count_published_signals().with(always()).times(1).returning(|_| Ok(0));
        audit.expect_count_executed_trades().times(1).returning(|_| Ok(1));
        audit
            .expect_count_sent_notifications()
            .times(1)
            .returning(|scope| Ok(if scope.symbol == "BTCUSDT" { 0 } else { 9 }));

        let executor = executor_with(repo.clone(), Arc::new(audit), ShadowConfig::default());
        let log = executor
            .execute_shadow(&shadow_version(), &decide_with(vec![]), &DecisionContext::default(), "BTCUSDT", Utc::now())
            .await
            .unwrap();

        let report = executor.validate_isolation(log.id).await.unwrap();

        assert!(!report.is_isolated());
        assert!(report.check(IsolationCheckKind::ShadowFlagRecorded).unwrap().passed);
        assert!(report.check(IsolationCheckKind::NoSignalPublished).unwrap().passed);
        assert!(!report.check(IsolationCheckKind::NoTradeExecuted).unwrap().passed);
        assert!(report.check(IsolationCheckKind::NoNotificationSent).unwrap().passed);
    }

    #[tokio::test]
    async fn test_validate_isolation_unknown_id() {
        let executor = executor_with(
            Arc::new(InMemoryShadowDecisionRepository::new()),
            Arc::new(InMemoryProductionStore::new()),
            ShadowConfig::default(),
        );
        let err = executor.validate_isolation(404).await.unwrap_err();
        assert!(matches!(err, ShadowError::NotFound(404)));
    }

    #[tokio::test]
    async fn test_cycle_skips_ineligible_versions() {
        let repo = Arc::new(InMemoryShadowDecisionRepository::new());
        let executor = executor_with(repo.clone(), Arc::new(InMemoryProductionStore::new()), ShadowConfig::default());
        let mut active = shadow_version();
        active.version = "v1".to_string();
        active.status = VersionStatus::Active;
        let mut canary = shadow_version();
        canary.version = "v3".to_string();
        canary.status = VersionStatus::Canary;

        let summary = executor
            .run_shadow_cycle(
                &[shadow_version(), active, canary],
                &decide_with(vec![Candidate::new(Side::Long)]),
                &DecisionContext::default(),
                &["BTCUSDT", "ETHUSDT"],
                Utc::now(),
            )
            .await;

        assert_eq!(
            summary,
            ShadowCycleSummary {
                recorded: 4,
                failed: 0,
                skipped: 1
            }
        );
        assert_eq!(repo.len(), 4);
    }
}
