use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Connection pool floor (spec.md §5: "bounded connection pool (>= 10)").
const MIN_POOL_CONNECTIONS: u32 = 10;
const MAX_POOL_CONNECTIONS: u32 = 20;

pub async fn create_pool(database_url: &str) -> AppResult<PgPool> {
    info!("connecting to database");

    let pool = PgPoolOptions::new()
        .min_connections(MIN_POOL_CONNECTIONS)
        .max_connections(MAX_POOL_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "failed to connect to database");
            AppError::Database(e)
        })?;

    info!("database connection pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "migration failed");
            AppError::Internal
        })?;

    info!("migrations applied");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> AppResult<()> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
        tracing::error!(error = ?e, "health check query failed");
        AppError::Database(e)
    })?;

    Ok(())
}

/// Retries a fallible database operation up to `attempts` times on
/// transient failures (pool exhaustion, connection drop), with a short
/// fixed backoff between attempts. Non-transient errors return immediately.
///
/// Used by operations the spec marks as allowed to retry internally before
/// surfacing `AppError::Transient` to the caller (see error::AppError).
pub async fn with_retry<T, F, Fut>(attempts: u32, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
{
    let mut last_err = None;

    for attempt in 0..attempts.max(1) {
        match op().await {
            Ok(value) => return Ok(value),
            Err(AppError::Transient(msg)) => {
                warn!(attempt, %msg, "transient database failure, retrying");
                last_err = Some(AppError::Transient(msg));
                tokio::time::sleep(Duration::from_millis(50 * (attempt as u64 + 1))).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or(AppError::Internal))
}
