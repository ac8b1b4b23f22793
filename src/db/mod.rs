//! Postgres-backed outbox: connection pool, migrations, and health check.
//!
//! The outbox table itself is owned by the application writing records;
//! this relay only reads and deletes rows it has seen settled.

pub mod outbox;

use crate::error::Result;
use crate::model::RecordId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Mutex;

/// Database handle. Owns the connection pool and the per-epoch read cursor.
pub struct Db {
    pool: PgPool,
    /// Highest record id dispatched in the current epoch.
    cursor: Mutex<Option<RecordId>>,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            cursor: Mutex::new(None),
        }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
