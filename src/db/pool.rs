//! Connection pool construction.
//!
//! PostgreSQL is tried first with the production pool settings and checked
//! with `SELECT 1`; if that fails the local SQLite fallback is used so the
//! server can still start.

use crate::config::DatabaseConfig;
use crate::error::DbError;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Executor};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Which engine the pool ended up on; selects the DDL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgres,
    Sqlite,
}

pub async fn connect(cfg: &DatabaseConfig) -> Result<(AnyPool, Engine), DbError> {
    sqlx::any::install_default_drivers();

    if cfg.is_postgres() {
        match connect_postgres(cfg).await {
            Ok(pool) => return Ok((pool, Engine::Postgres)),
            Err(e) => {
                warn!(
                    error = %e,
                    fallback = %cfg.fallback_url,
                    "PostgreSQL unavailable, using local SQLite so the server can start"
                );
            }
        }
        let pool = connect_sqlite(&cfg.fallback_url).await?;
        return Ok((pool, Engine::Sqlite));
    }
    Ok((connect_sqlite(&cfg.url).await?, Engine::Sqlite))
}

async fn connect_postgres(cfg: &DatabaseConfig) -> Result<AnyPool, DbError> {
    let url = with_sslmode(&cfg.url, &cfg.sslmode);
    let statement_timeout = cfg.statement_timeout_ms;
    let pool = AnyPoolOptions::new()
        .max_connections(cfg.pool_size + cfg.max_overflow)
        .max_lifetime(Duration::from_secs(cfg.pool_recycle_secs))
        .idle_timeout(Duration::from_secs(cfg.idle_timeout_secs))
        .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
        .test_before_acquire(cfg.pre_ping)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = {statement_timeout}").as_str())
                    .await?;
                Ok(())
            })
        })
        .connect(&url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(
        max_connections = cfg.pool_size + cfg.max_overflow,
        sslmode = %cfg.sslmode,
        "connected to PostgreSQL"
    );
    Ok(pool)
}

async fn connect_sqlite(url: &str) -> Result<AnyPool, DbError> {
    // One writer at a time keeps SQLite from reporting `database is locked`.
    let pool = AnyPoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await?;
    info!(url = %url, "connected to SQLite");
    Ok(pool)
}

/// Add `sslmode` to the URL unless it already names one.
fn with_sslmode(raw: &str, sslmode: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if sslmode.is_empty() || url.query_pairs().any(|(k, _)| k == "sslmode") {
        return raw.to_string();
    }
    url.query_pairs_mut().append_pair("sslmode", sslmode);
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sslmode_is_appended_once() {
        assert_eq!(
            with_sslmode("postgresql://u:p@db.example.com:5432/app", "require"),
            "postgresql://u:p@db.example.com:5432/app?sslmode=require"
        );
        assert_eq!(
            with_sslmode("postgresql://db/app?sslmode=disable", "require"),
            "postgresql://db/app?sslmode=disable"
        );
    }

    #[tokio::test]
    async fn unreachable_postgres_falls_back_to_sqlite() {
        let path = std::env::temp_dir().join(format!(
            "corpfront_pool_{}_{}.db",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let cfg = DatabaseConfig {
            url: "postgresql://nobody@127.0.0.1:1/none".to_string(),
            fallback_url: format!("sqlite://{}?mode=rwc", path.display()),
            acquire_timeout_secs: 1,
            ..DatabaseConfig::default()
        };
        let (pool, engine) = connect(&cfg).await.unwrap();
        assert_eq!(engine, Engine::Sqlite);
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, 1);
        pool.close().await;
        let _ = std::fs::remove_file(path);
    }
}
