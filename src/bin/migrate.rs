use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use strategy_rollout::config::{ConfigManager, Environment};
use strategy_rollout::monitor::init_logging;
use strategy_rollout::storage;
use tracing::info;

#[derive(Parser)]
#[command(name = "migrate", about = "strategy-rollout 數據庫遷移工具")]
struct Cli {
    /// 配置目錄（預設讀取 CONFIG_DIR 或 ./config）
    #[arg(long)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 運行所有未應用的遷移
    Run,

    /// 檢查遷移狀態
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行參數
    let cli = Cli::parse();

    let manager = match &cli.config_dir {
        Some(dir) => ConfigManager::load_from_dir(dir, Environment::from_env()),
        None => ConfigManager::load_from_env(),
    }
    .context("無法載入配置")?;
    let config = manager.current();

    init_logging(&config.log)?;

    let pool = storage::init_pool(&config.database)
        .await
        .context("無法初始化資料庫連接池")?;

    match cli.command {
        Commands::Run => {
            info!("開始運行資料庫遷移...");
            storage::run_migrations(&pool)
                .await
                .context("資料庫遷移執行失敗")?;
            info!("資料庫遷移完成！");
        }
        Commands::Status => {
            info!("檢查資料庫遷移狀態...");
            let status = storage::migration_status(&pool)
                .await
                .context("無法讀取遷移狀態")?;
            for (version, description, applied) in status {
                let mark = if applied { "已套用" } else { "未套用" };
                println!("{:>16}  {:<6}  {}", version, mark, description);
            }
        }
    }

    Ok(())
}
