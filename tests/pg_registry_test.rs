mod common;

use chrono::Utc;
use common::{fib_rsi_config, setup_test_db};
use std::sync::Arc;
use strategy_rollout::config::ConfigManager;
use strategy_rollout::registry::VersionRegistry;
use strategy_rollout::storage::repository::PgStrategyVersionRepository;
use strategy_rollout::storage::VersionStatus;

fn unique_strategy(prefix: &str) -> String {
    format!("{}_{}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "需要 PostgreSQL (DATABASE_URL)"]
async fn test_pg_concurrent_activation_keeps_single_active() {
    let pool = Arc::new(setup_test_db().await);
    let registry = Arc::new(VersionRegistry::new(
        Arc::new(PgStrategyVersionRepository::new(pool)),
        ConfigManager::default(),
    ));
    let strategy = unique_strategy("pg_race");

    for i in 0..6 {
        registry
            .register_version(&strategy, &format!("v{i}"), fib_rsi_config(10 + i), VersionStatus::Shadow)
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let registry = registry.clone();
            let strategy = strategy.clone();
            tokio::spawn(async move { registry.activate_version(&strategy, &format!("v{i}")).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let versions = registry.list_all_versions(Some(&strategy)).await.unwrap();
    let active = versions.iter().filter(|v| v.status == VersionStatus::Active).count();
    assert_eq!(active, 1);
    assert_eq!(versions.len(), 6);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL (DATABASE_URL)"]
async fn test_pg_canary_lifecycle() {
    let pool = Arc::new(setup_test_db().await);
    let registry = VersionRegistry::new(
        Arc::new(PgStrategyVersionRepository::new(pool)),
        ConfigManager::default(),
    );
    let strategy = unique_strategy("pg_canary");

    registry
        .register_version(&strategy, "v1", fib_rsi_config(14), VersionStatus::Active)
        .await
        .unwrap();
    registry
        .register_version(&strategy, "v2", fib_rsi_config(21), VersionStatus::Shadow)
        .await
        .unwrap();

    registry.activate_canary(&strategy, "v2", 100.0).await.unwrap();
    assert!(registry.route_user("user_1", &strategy).await.unwrap().via_canary);

    let outcome = registry.activate_version(&strategy, "v2").await.unwrap();
    assert!(outcome.canary_cleared);
    assert_eq!(outcome.retired.unwrap().version, "v1");
    assert!(registry.get_canary_config(&strategy).await.unwrap().is_none());

    let stored = registry.get_version(&strategy, "v2").await.unwrap().unwrap();
    assert_eq!(stored.config, fib_rsi_config(21));
}
