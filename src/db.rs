use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Open (creating if needed) the tracker database at `db_path` and apply
/// pending migrations.
pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "nutrilog",
                error = %e,
                event = "data_dir_create_failed",
                path = %parent.display()
            );
            e
        })?;
    }
    tracing::info!(target: "nutrilog", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open sqlite database {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;
    crate::migrate::apply_migrations(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
pub async fn open_memory_pool() -> AnyResult<Pool<Sqlite>> {
    let opts = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .context("open in-memory sqlite database")?;
    crate::migrate::apply_migrations(&pool).await?;
    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "nutrilog",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0
    );

    if !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "nutrilog",
            event = "db_open_warning",
            msg = "journal_mode != WAL; running with reduced crash safety"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_pool_enables_foreign_keys_and_schema() {
        let dir = TempDir::new().expect("tempdir");
        let pool = open_sqlite_pool(&dir.path().join("nested/nutrilog.sqlite3"))
            .await
            .expect("open pool");
        let fks: i64 = sqlx::query_scalar("PRAGMA foreign_keys;")
            .fetch_one(&pool)
            .await
            .expect("pragma");
        assert_eq!(fks, 1);
        let meals: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM meals")
            .fetch_one(&pool)
            .await
            .expect("meals table exists");
        assert_eq!(meals, 0);
    }

    #[tokio::test]
    async fn memory_pool_rejects_dangling_foreign_keys() {
        let pool = open_memory_pool().await.expect("memory pool");
        let res = sqlx::query(
            "INSERT INTO pill_check_ins (pill_id, taken_at) VALUES (999, '2024-01-01T08:00:00')",
        )
        .execute(&pool)
        .await;
        assert!(res.is_err());
    }
}
