use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// 應用程序配置結構
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub database: DatabaseConfig,
    pub log: LogConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證各個部分的配置
        self.database.validate()?;
        self.log.validate()?;
        self.registry.validate()?;
        self.shadow.validate()?;
        self.metrics.validate()?;

        Ok(())
    }
}

/// 數據庫配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub max_lifetime_secs: u64,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "rollout".to_string(),
            password: String::new(),
            database: "strategy_rollout".to_string(),
            max_connections: 10,
            min_connections: 1,
            max_lifetime_secs: 1800,
            acquire_timeout_secs: 3,
            idle_timeout_secs: 600,
        }
    }
}

impl Validator for DatabaseConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.host, "database.host")?;
        ValidationUtils::not_empty(&self.username, "database.username")?;
        ValidationUtils::not_empty(&self.database, "database.database")?;
        ValidationUtils::in_range(self.port, 1, 65535, "database.port")?;
        ValidationUtils::in_range(
            self.max_connections,
            self.min_connections.max(1),
            1000,
            "database.max_connections",
        )?;

        Ok(())
    }
}

impl DatabaseConfig {
    /// 獲取最大生命週期持續時間
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    /// 獲取獲取連接超時持續時間
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// 獲取閒置超時持續時間
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::one_of(
            &self.level.to_lowercase().as_str(),
            &["trace", "debug", "info", "warn", "error"],
            "log.level",
        )?;

        ValidationUtils::one_of(
            &self.format.to_lowercase().as_str(),
            &["pretty", "json"],
            "log.format",
        )?;

        Ok(())
    }
}

/// 版本註冊表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 交易序列化衝突時的最大重試次數
    pub max_activation_retries: u32,
    /// 重試退避的基礎延遲（毫秒）
    pub retry_base_delay_ms: u64,
    /// 重試退避的延遲上限（毫秒）
    pub retry_max_delay_ms: u64,
    /// 操作員未指定時使用的金絲雀流量百分比
    pub default_canary_percent: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_activation_retries: 5,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 500,
            default_canary_percent: 5.0,
        }
    }
}

impl RegistryConfig {
    /// 第 `attempt` 次重試的退避時間（不含抖動）
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(20)).unwrap_or(u64::MAX);
        let delay = self.retry_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.retry_max_delay_ms))
    }
}

impl Validator for RegistryConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.max_activation_retries, 0, 50, "registry.max_activation_retries")?;
        ValidationUtils::in_range(
            self.retry_max_delay_ms,
            self.retry_base_delay_ms,
            60_000,
            "registry.retry_max_delay_ms",
        )?;
        ValidationUtils::in_range(
            self.default_canary_percent,
            0.0,
            100.0,
            "registry.default_canary_percent",
        )?;

        Ok(())
    }
}

/// 影子執行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// 決策函數逾時（毫秒），0 表示不設限
    pub decision_timeout_ms: u64,
    /// 單一週期內同時評估的 (版本, 標的) 數量上限
    pub max_parallel_evaluations: usize,
    /// 比較分析的預設時間窗口（天）
    pub default_window_days: u32,
    /// 隔離驗證時，以影子紀錄時間為中心的檢查範圍（秒）
    pub isolation_window_secs: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            decision_timeout_ms: 0,
            max_parallel_evaluations: 16,
            default_window_days: 7,
            isolation_window_secs: 60,
        }
    }
}

impl ShadowConfig {
    /// 決策函數逾時，未設定時為 `None`
    pub fn decision_timeout(&self) -> Option<Duration> {
        (self.decision_timeout_ms > 0).then(|| Duration::from_millis(self.decision_timeout_ms))
    }
}

impl Validator for ShadowConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(
            self.max_parallel_evaluations,
            1,
            1024,
            "shadow.max_parallel_evaluations",
        )?;
        ValidationUtils::in_range(self.default_window_days, 1, 365, "shadow.default_window_days")?;
        ValidationUtils::in_range(self.isolation_window_secs, 0, 86_400, "shadow.isolation_window_secs")?;

        Ok(())
    }
}

/// 監控指標配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 是否啟用指標輸出
    pub enabled: bool,
    /// Prometheus 監聽位址（例如 "0.0.0.0:9100"）
    pub prometheus_listen: Option<String>,
}

impl MetricsConfig {
    /// 解析 Prometheus 監聽位址
    pub fn listen_addr(&self) -> Result<Option<SocketAddr>, ValidationError> {
        self.prometheus_listen
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>().map_err(|_| {
                    ValidationError::InvalidValue(format!("metrics.prometheus_listen 無效: {}", addr))
                })
            })
            .transpose()
    }
}

impl Validator for MetricsConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::check_dependency(
            self.prometheus_listen.is_some(),
            self.enabled,
            "metrics.prometheus_listen",
            "metrics.enabled",
        )?;
        self.listen_addr()?;

        Ok(())
    }
}
