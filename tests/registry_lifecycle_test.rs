mod common;

use assert_matches::assert_matches;
use common::{fib_rsi_config, harness, register_fib_rsi};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strategy_rollout::registry::{stable_bucket, RegistryError};
use strategy_rollout::storage::VersionStatus;

#[tokio::test]
async fn test_fib_rsi_rollout_scenario() {
    let h = harness();
    let (v1, _) = register_fib_rsi(&h.registry).await;
    assert!(v1.activated_at.is_some());

    let shadows = h.registry.list_shadow_versions("fib_rsi").await.unwrap();
    assert_eq!(shadows.len(), 1);
    assert_eq!(shadows[0].version, "v2");

    h.registry.activate_canary("fib_rsi", "v2", 10.0).await.unwrap();

    let keys: Vec<String> = (0..1000).map(|i| format!("user_{i}")).collect();
    let mut canary_hits = 0;
    for key in &keys {
        let decision = h.registry.route_user(key, "fib_rsi").await.unwrap();
        assert_eq!(decision.via_canary, decision.version.version == "v2");
        assert_eq!(decision.via_canary, f64::from(decision.bucket) < 10.0);
        if decision.via_canary {
            canary_hits += 1;
        }
    }
    assert!((70..=130).contains(&canary_hits), "canary hits: {canary_hits}");

    // 同一狀態下重複路由結果不變
    for key in keys.iter().take(200) {
        let first = h.registry.route_user(key, "fib_rsi").await.unwrap();
        let second = h.registry.route_user(key, "fib_rsi").await.unwrap();
        assert_eq!(first.version.version, second.version.version);
    }

    let config = h.registry.update_canary_percent("fib_rsi", 50.0).await.unwrap();
    assert_eq!(config.rollout_percent, 50.0);

    let outcome = h.registry.activate_version("fib_rsi", "v2").await.unwrap();
    assert!(outcome.canary_cleared);

    let v1 = h.registry.get_version("fib_rsi", "v1").await.unwrap().unwrap();
    let v2 = h.registry.get_version("fib_rsi", "v2").await.unwrap().unwrap();
    assert_eq!(v1.status, VersionStatus::Retired);
    assert!(v1.retired_at.is_some());
    assert_eq!(v2.status, VersionStatus::Active);
    assert!(v2.activated_at.is_some());
    assert!(h.registry.get_canary_config("fib_rsi").await.unwrap().is_none());

    for key in keys.iter().take(100) {
        let decision = h.registry.route_user(key, "fib_rsi").await.unwrap();
        assert_eq!(decision.version.version, "v2");
        assert!(!decision.via_canary);
    }
}

#[tokio::test]
async fn test_canary_distribution_within_tolerance() {
    let h = harness();
    register_fib_rsi(&h.registry).await;
    h.registry.activate_canary("fib_rsi", "v2", 25.0).await.unwrap();

    let total = 10_000;
    let mut canary = 0;
    for i in 0..total {
        if h.registry.route_user(&format!("acct-{i}"), "fib_rsi").await.unwrap().via_canary {
            canary += 1;
        }
    }

    let share = f64::from(canary) / f64::from(total) * 100.0;
    assert!((share - 25.0).abs() <= 3.0, "canary share {share}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activations_leave_one_active() {
    let h = harness();
    let registry = Arc::new(h.registry);
    registry
        .register_version("fib_rsi", "base", json!({"i": -1}), VersionStatus::Active)
        .await
        .unwrap();
    for i in 0..8 {
        registry
            .register_version("fib_rsi", &format!("v{i}"), json!({"i": i}), VersionStatus::Shadow)
            .await
            .unwrap();
    }

    // 切換期間讀取端必須始終看到恰好一個 ACTIVE
    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let registry = registry.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut reads = 0u32;
                while !stop.load(Ordering::SeqCst) || reads == 0 {
                    let active = registry.get_active_version("fib_rsi").await.unwrap();
                    assert!(active.is_some(), "讀取時沒有 ACTIVE 版本");
                    let decision = registry.route_user(&format!("reader_{r}_{reads}"), "fib_rsi").await.unwrap();
                    assert_eq!(decision.version.status, VersionStatus::Active);
                    reads += 1;
                    tokio::task::yield_now().await;
                }
                reads
            })
        })
        .collect();

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.activate_version("fib_rsi", &format!("v{i}")).await })
        })
        .collect();
    for handle in writers {
        handle.await.unwrap().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    for handle in readers {
        assert!(handle.await.unwrap() > 0);
    }

    let all = registry.list_all_versions(Some("fib_rsi")).await.unwrap();
    let active: Vec<_> = all.iter().filter(|v| v.status == VersionStatus::Active).collect();
    let retired = all.iter().filter(|v| v.status == VersionStatus::Retired).count();
    assert_eq!(active.len(), 1);
    assert_eq!(retired, 8);
    assert_eq!(
        registry.get_active_version("fib_rsi").await.unwrap().unwrap().version,
        active[0].version
    );
}

#[tokio::test]
async fn test_update_canary_percent_rejects_invalid_values() {
    let h = harness();
    register_fib_rsi(&h.registry).await;
    h.registry.activate_canary("fib_rsi", "v2", 10.0).await.unwrap();

    for percent in [-1.0, 100.01, f64::NAN, f64::INFINITY] {
        assert_matches!(
            h.registry.update_canary_percent("fib_rsi", percent).await,
            Err(RegistryError::InvalidRange(_))
        );
    }
    assert_eq!(h.registry.get_canary_config("fib_rsi").await.unwrap().unwrap().rollout_percent, 10.0);

    // 邊界值可接受
    assert_eq!(h.registry.update_canary_percent("fib_rsi", 100.0).await.unwrap().rollout_percent, 100.0);
    assert_eq!(h.registry.update_canary_percent("fib_rsi", 0.0).await.unwrap().rollout_percent, 0.0);
}

#[tokio::test]
async fn test_error_taxonomy() {
    let h = harness();
    register_fib_rsi(&h.registry).await;

    assert_matches!(
        h.registry
            .register_version("fib_rsi", "v2", json!({}), VersionStatus::Shadow)
            .await,
        Err(RegistryError::AlreadyExists { .. })
    );
    assert_matches!(
        h.registry
            .register_version("fib_rsi", "v3", json!({}), VersionStatus::Active)
            .await,
        Err(RegistryError::ConflictingActive(_))
    );
    assert_matches!(
        h.registry.activate_version("fib_rsi", "v1").await,
        Err(RegistryError::AlreadyActive { .. })
    );
    assert_matches!(
        h.registry.activate_version("fib_rsi", "v404").await,
        Err(RegistryError::NotFound { .. })
    );
    assert_matches!(
        h.registry.activate_canary("fib_rsi", "v404", 10.0).await,
        Err(RegistryError::NotFound { .. })
    );
    assert_matches!(
        h.registry.update_canary_percent("fib_rsi", 10.0).await,
        Err(RegistryError::NoActiveCanary(_))
    );
    assert_matches!(
        h.registry.retire_version("fib_rsi", "v1").await,
        Err(RegistryError::CannotRetireActive { .. })
    );
    assert_matches!(
        h.registry.activate_canary("fib_rsi", "v1", 10.0).await,
        Err(RegistryError::InvalidTransition { from: VersionStatus::Active, .. })
    );
    assert_matches!(
        h.registry.route_user("user_1", "unknown_strategy").await,
        Err(RegistryError::NoActiveVersion(_))
    );
}

#[tokio::test]
async fn test_retiring_canary_stops_canary_routing() {
    let h = harness();
    register_fib_rsi(&h.registry).await;
    h.registry.activate_canary("fib_rsi", "v2", 100.0).await.unwrap();
    assert!(h.registry.route_user("user_1", "fib_rsi").await.unwrap().via_canary);

    let retired = h.registry.retire_version("fib_rsi", "v2").await.unwrap();
    assert_eq!(retired.status, VersionStatus::Retired);
    assert!(h.registry.get_canary_config("fib_rsi").await.unwrap().is_none());

    let decision = h.registry.route_user("user_1", "fib_rsi").await.unwrap();
    assert_eq!(decision.version.version, "v1");
    assert_matches!(
        h.registry.update_canary_percent("fib_rsi", 20.0).await,
        Err(RegistryError::NoActiveCanary(_))
    );
}

#[tokio::test]
async fn test_zero_percent_canary_routes_everyone_to_active() {
    let h = harness();
    register_fib_rsi(&h.registry).await;
    h.registry.activate_canary("fib_rsi", "v2", 0.0).await.unwrap();

    for i in 0..200 {
        let decision = h.registry.route_user(&format!("user_{i}"), "fib_rsi").await.unwrap();
        assert_eq!(decision.version.version, "v1");
        assert_eq!(decision.bucket, stable_bucket(&format!("user_{i}")));
    }
}

#[tokio::test]
async fn test_config_round_trip_and_listing_order() {
    let h = harness();
    register_fib_rsi(&h.registry).await;
    h.registry
        .register_version("fib_rsi", "v3", fib_rsi_config(9), VersionStatus::Shadow)
        .await
        .unwrap();
    h.registry
        .register_version("mean_revert", "v1", json!({"lookback": 20}), VersionStatus::Shadow)
        .await
        .unwrap();

    let stored = h.registry.get_version("fib_rsi", "v3").await.unwrap().unwrap();
    assert_eq!(stored.config, fib_rsi_config(9));

    let fib_versions: Vec<String> = h
        .registry
        .list_all_versions(Some("fib_rsi"))
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(fib_versions, vec!["v3", "v2", "v1"]);

    assert_eq!(h.registry.list_all_versions(None).await.unwrap().len(), 4);
}
