use crate::config::loader::{ConfigLoader, Environment};
use crate::config::types::{ApplicationConfig, RegistryConfig, ShadowConfig};
use crate::config::validation::{ValidationError, Validator};
use config::ConfigError;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 配置管理器
///
/// 持有目前生效的配置快照。讀取者拿到的是不可變的 `Arc` 快照；
/// 更新會先在副本上套用、驗證，通過後才整批替換，
/// 因此任何讀取者都不會看到半套用的配置。
#[derive(Debug, Clone)]
pub struct ConfigManager {
    current: Arc<RwLock<Arc<ApplicationConfig>>>,
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(ApplicationConfig::default()))),
        }
    }
}

impl ConfigManager {
    /// 以已驗證的配置建立管理器
    pub fn new(config: ApplicationConfig) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// 以指定的註冊表與影子配置建立管理器，其餘區段使用預設值
    pub fn with_sections(registry: RegistryConfig, shadow: ShadowConfig) -> Result<Self, ValidationError> {
        Self::new(ApplicationConfig {
            registry,
            shadow,
            ..ApplicationConfig::default()
        })
    }

    /// 從環境變數指定的環境加載配置
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let env = Environment::from_env();
        debug!("從環境加載配置: {:?}", env);
        Self::from_source(ConfigLoader::load(env)?)
    }

    /// 從指定目錄與環境加載配置
    pub fn load_from_dir(config_dir: impl AsRef<Path>, env: Environment) -> Result<Self, ConfigError> {
        Self::from_source(ConfigLoader::load_from_dir(config_dir, env)?)
    }

    fn from_source(source: config::Config) -> Result<Self, ConfigError> {
        // 使用 serde 反序列化配置
        let app_config: ApplicationConfig = source.try_deserialize()?;

        Self::new(app_config).map_err(|err| {
            warn!("配置驗證失敗: {}", err);
            ConfigError::Message(err.to_string())
        })
    }

    /// 取得目前的配置快照
    pub fn current(&self) -> Arc<ApplicationConfig> {
        Arc::clone(&self.current.read())
    }

    /// 取得版本註冊表配置副本
    pub fn registry(&self) -> RegistryConfig {
        self.current.read().registry.clone()
    }

    /// 取得影子執行配置副本
    pub fn shadow(&self) -> ShadowConfig {
        self.current.read().shadow.clone()
    }

    /// 套用配置變更
    ///
    /// 變更在寫鎖內以副本套用並驗證；驗證失敗時原配置保持不變。
    pub fn update<F>(&self, mutate: F) -> Result<Arc<ApplicationConfig>, ValidationError>
    where
        F: FnOnce(&mut ApplicationConfig),
    {
        let mut guard = self.current.write();
        let mut candidate = ApplicationConfig::clone(&guard);
        mutate(&mut candidate);

        if let Err(err) = candidate.validate() {
            warn!("拒絕無效的配置更新: {}", err);
            return Err(err);
        }

        let next = Arc::new(candidate);
        *guard = Arc::clone(&next);
        info!("配置已更新");
        Ok(next)
    }
}
