use crate::config::LogConfig;
use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 由配置建立日誌過濾器
///
/// `RUST_LOG` 存在時優先使用，否則採用配置中的級別。
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()))
}

/// 初始化全域日誌系統
///
/// `format` 為 "json" 時輸出結構化 JSON，其餘為易讀格式。
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(build_filter(config));

    let installed = if config.format.eq_ignore_ascii_case("json") {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.with_target(true).try_init()
    };
    installed.map_err(|e| anyhow!("設置日誌系統失敗: {}", e))?;

    info!(level = %config.level, format = %config.format, "日誌系統初始化完成");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_uses_config_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = build_filter(&LogConfig {
            level: "WARN".to_string(),
            format: "pretty".to_string(),
        });
        assert_eq!(filter.to_string(), "warn");
    }
}
