use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::time::now_local;
use tracing::{error, info};

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let cut: String = trimmed.chars().take(160).collect();
        format!("{cut}…")
    } else {
        trimmed.to_string()
    }
}

static MIGRATIONS: &[(&str, &str)] = &[(
    "0001_baseline.sql",
    include_str!("../migrations/0001_baseline.sql"),
)];

fn clean(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Latest migration file name, recorded in `schema_migrations`.
pub fn latest_version() -> &'static str {
    MIGRATIONS.last().map(|(name, _)| *name).unwrap_or_default()
}

pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at TEXT NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = clean(raw_sql);
        let checksum = format!("{:x}", Sha256::digest(cleaned.as_bytes()));

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "nutrilog", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            info!(target: "nutrilog", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "nutrilog", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(crate::time::format_datetime(&now_local()))
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "nutrilog", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect sqlite::memory:")
    }

    #[tokio::test]
    async fn applies_baseline_once() {
        let pool = memory_pool().await;
        apply_migrations(&pool).await.expect("first run");
        apply_migrations(&pool).await.expect("second run is a no-op");

        let versions: Vec<String> = sqlx::query_scalar("SELECT version FROM schema_migrations")
            .fetch_all(&pool)
            .await
            .expect("versions");
        assert_eq!(versions, vec![latest_version().to_string()]);

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('meals','exercises','pills','tags','user_goals','meal_check_ins', \
              'exercise_logs','pill_check_ins','meal_tags','exercise_tags')",
        )
        .fetch_one(&pool)
        .await
        .expect("count tables");
        assert_eq!(tables, 10);
    }

    #[tokio::test]
    async fn edited_migration_is_rejected() {
        let pool = memory_pool().await;
        apply_migrations(&pool).await.expect("apply");
        sqlx::query("UPDATE schema_migrations SET checksum = 'tampered'")
            .execute(&pool)
            .await
            .expect("tamper");
        let err = apply_migrations(&pool).await.expect_err("checksum mismatch");
        assert!(err.to_string().contains("edited after application"));
    }

    #[test]
    fn preview_truncates_long_sql() {
        let sql = "SELECT 1;\n".repeat(40);
        let shown = preview(&sql);
        assert!(shown.ends_with('…'));
        assert!(!shown.contains('\n'));
    }
}
