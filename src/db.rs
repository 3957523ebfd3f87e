use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::AppConfig;

/// Build the Postgres pool when `DATABASE_URL` is configured. The pool
/// is lazy; connections are established on first use.
pub fn build_pool(config: &AppConfig) -> Option<PgPool> {
    let url = config.database_url.as_deref()?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_max_connections)
        .min_connections(config.db_pool_min_connections)
        .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
        .connect_lazy(url);

    match pool {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::error!(error = %err, "invalid DATABASE_URL, starting without a database");
            None
        }
    }
}
