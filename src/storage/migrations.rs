use crate::storage::repository::is_undefined_table;
use anyhow::Result;
use sqlx::{migrate::Migrator, PgPool};
use tracing::info;

// 靜態嵌入遷移目錄（此目錄應放在專案根目錄）
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// 執行數據庫遷移
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("開始執行數據庫遷移...");
    MIGRATOR.run(pool).await?;
    info!("SQLx 遷移完成");
    Ok(())
}

/// 列出已嵌入的遷移及其是否已套用
pub async fn migration_status(pool: &PgPool) -> Result<Vec<(i64, String, bool)>> {
    let applied = applied_or_uninitialized(
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success")
            .fetch_all(pool)
            .await,
    )?;

    Ok(MIGRATOR
        .iter()
        .map(|m| (m.version, m.description.to_string(), applied.contains(&m.version)))
        .collect())
}

/// 遷移表尚未建立時視為沒有已套用的遷移，其餘錯誤照常回傳
fn applied_or_uninitialized(result: Result<Vec<i64>, sqlx::Error>) -> Result<Vec<i64>, sqlx::Error> {
    match result {
        Err(err) if is_undefined_table(&err) => Ok(Vec::new()),
        other => other,
    }
}
