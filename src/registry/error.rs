use crate::storage::models::VersionStatus;
use crate::storage::repository::VersionError;
use thiserror::Error;

/// 版本註冊表錯誤
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("版本已存在: {strategy}@{version}")]
    AlreadyExists { strategy: String, version: String },

    #[error("策略 {0} 已有 ACTIVE 版本")]
    ConflictingActive(String),

    #[error("版本已是 ACTIVE: {strategy}@{version}")]
    AlreadyActive { strategy: String, version: String },

    #[error("版本不存在: {strategy}@{version}")]
    NotFound { strategy: String, version: String },

    /// 流量百分比不在 [0, 100]
    #[error("流量百分比超出範圍 [0, 100]: {0}")]
    InvalidRange(f64),

    #[error("策略 {0} 沒有金絲雀配置")]
    NoActiveCanary(String),

    #[error("無法退役目前的 ACTIVE 版本: {strategy}@{version}")]
    CannotRetireActive { strategy: String, version: String },

    /// 策略沒有可承接流量的版本，呼叫端必須拒絕服務
    #[error("策略 {0} 沒有可用的 ACTIVE 版本")]
    NoActiveVersion(String),

    #[error("不允許的狀態轉換 {strategy}@{version}: {from} -> {to}")]
    InvalidTransition {
        strategy: String,
        version: String,
        from: VersionStatus,
        to: VersionStatus,
    },

    /// 儲存層錯誤（含重試耗盡的交易衝突）
    #[error("儲存層錯誤: {0}")]
    Store(#[source] VersionError),
}

impl From<VersionError> for RegistryError {
    fn from(err: VersionError) -> Self {
        match err {
            VersionError::AlreadyExists { strategy, version } => {
                RegistryError::AlreadyExists { strategy, version }
            }
            VersionError::ConflictingActive(strategy) => RegistryError::ConflictingActive(strategy),
            VersionError::AlreadyActive { strategy, version } => {
                RegistryError::AlreadyActive { strategy, version }
            }
            VersionError::NotFound { strategy, version } => RegistryError::NotFound { strategy, version },
            VersionError::NoActiveCanary(strategy) => RegistryError::NoActiveCanary(strategy),
            VersionError::CannotRetireActive { strategy, version } => {
                RegistryError::CannotRetireActive { strategy, version }
            }
            VersionError::InvalidTransition {
                strategy,
                version,
                from,
                to,
            } => RegistryError::InvalidTransition {
                strategy,
                version,
                from,
                to,
            },
            other @ (VersionError::SerializationConflict
            | VersionError::Database(_)
            | VersionError::Corrupt(_)) => RegistryError::Store(other),
        }
    }
}
