//! 確定性流量分桶
//!
//! 路由鍵以 SHA-256 雜湊後取前 8 位元組（big-endian `u64`）對 100 取餘，
//! 結果與行程、平台、重啟無關。

use crate::storage::models::{RoutingSnapshot, StrategyVersion};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 分桶數量
pub const BUCKET_COUNT: u64 = 100;

/// 計算路由鍵的穩定分桶 `[0, 100)`
pub fn stable_bucket(key: &str) -> u8 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % BUCKET_COUNT) as u8
}

/// 路由鍵的短指紋，供日誌使用而不外洩原始鍵
pub fn routing_fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..6])
}

/// 路由結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub version: StrategyVersion,
    /// 是否經由金絲雀分流
    pub via_canary: bool,
    pub bucket: u8,
}

/// 依快照為分桶選擇版本
///
/// 有效金絲雀且 `bucket < percent` 時走金絲雀，否則走 ACTIVE；
/// 兩者皆無時回傳 `None`。
pub fn select_version(snapshot: &RoutingSnapshot, bucket: u8) -> Option<RouteDecision> {
    if let Some((canary, percent)) = snapshot.effective_canary() {
        if f64::from(bucket) < percent {
            return Some(RouteDecision {
                version: canary.clone(),
                via_canary: true,
                bucket,
            });
        }
    }

    snapshot.active.as_ref().map(|active| RouteDecision {
        version: active.clone(),
        via_canary: false,
        bucket,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::{CanaryConfig, VersionStatus};
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;

    fn version(name: &str, status: VersionStatus) -> StrategyVersion {
        let now = Utc::now();
        StrategyVersion {
            id: 1,
            strategy_name: "fib_rsi".to_string(),
            version: name.to_string(),
            status,
            config: json!({}),
            description: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            activated_at: None,
            retired_at: None,
        }
    }

    fn snapshot(percent: f64) -> RoutingSnapshot {
        let now = Utc::now();
        RoutingSnapshot {
            active: Some(version("v1", VersionStatus::Active)),
            canary_version: Some(version("v2", VersionStatus::Canary)),
            canary_config: Some(CanaryConfig {
                strategy_name: "fib_rsi".to_string(),
                version: "v2".to_string(),
                rollout_percent: percent,
                created_at: now,
                updated_at: now,
                started_at: now,
            }),
        }
    }

    #[test]
    fn test_bucket_is_stable_known_value() {
        // SHA-256("") 前 8 位元組 = e3b0c44298fc1c14
        assert_eq!(u64::from(stable_bucket("")), 0xe3b0_c442_98fc_1c14_u64 % 100);
    }

    #[test]
    fn test_fingerprint_hides_key() {
        let fp = routing_fingerprint("user_42");
        assert_eq!(fp.len(), 12);
        assert!(!fp.contains("user_42"));
    }

    #[test]
    fn test_zero_and_full_percent() {
        for bucket in [0u8, 50, 99] {
            let decision = select_version(&snapshot(0.0), bucket).unwrap();
            assert!(!decision.via_canary);
            assert_eq!(decision.version.version, "v1");

            let decision = select_version(&snapshot(100.0), bucket).unwrap();
            assert!(decision.via_canary);
            assert_eq!(decision.version.version, "v2");
        }
    }

    #[test]
    fn test_fractional_percent_boundary() {
        assert!(select_version(&snapshot(10.5), 10).unwrap().via_canary);
        assert!(!select_version(&snapshot(10.5), 11).unwrap().via_canary);
        assert!(!select_version(&snapshot(10.0), 10).unwrap().via_canary);
    }

    #[test]
    fn test_canary_only_routes_low_buckets() {
        let only_canary = RoutingSnapshot {
            active: None,
            ..snapshot(30.0)
        };
        assert!(select_version(&only_canary, 5).unwrap().via_canary);
        assert!(select_version(&only_canary, 50).is_none());
        assert!(select_version(&RoutingSnapshot::default(), 0).is_none());
    }

    proptest! {
        #[test]
        fn prop_bucket_in_range_and_deterministic(key in ".*") {
            let bucket = stable_bucket(&key);
            prop_assert!(bucket < 100);
            prop_assert_eq!(bucket, stable_bucket(&key));
        }

        #[test]
        fn prop_routing_is_deterministic(key in "[a-z0-9_]{1,32}", percent in 0.0f64..=100.0) {
            let snap = snapshot(percent);
            let first = select_version(&snap, stable_bucket(&key));
            let second = select_version(&snap, stable_bucket(&key));
            prop_assert_eq!(first, second);
        }
    }
}
