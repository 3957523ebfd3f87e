use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: Option<PgPool>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = db::build_pool(&config);
        if db_pool.is_none() {
            tracing::warn!("DATABASE_URL is not set; billing endpoints will return 503");
        }
        Ok(Self { config, db_pool })
    }

    pub fn pool(&self) -> AppResult<&PgPool> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
        })
    }
}
