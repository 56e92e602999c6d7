//! PostgreSQL connection pool management.
//!
//! Tenancy is row-scoped: every tenant-owned table carries a `tenant_id`
//! column and queries filter on it. A single shared pool serves all tenants.

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Shared database pool handed to repositories.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Connect and build the pool from configuration.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Database pool initialized"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests and tooling).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn get(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip check used by the health endpoint.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
