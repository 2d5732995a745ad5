//! SQLite database handle for the Herald server.

use std::path::Path;

use herald_core::db::{DatabaseError, open_pool, open_pool_in_memory};
use sqlx::{Pool, Sqlite};
use tracing::info;

/// Cloneable handle over the shared connection pool. Every storage query is
/// a method on this type.
#[derive(Clone)]
pub struct HeraldDatabase {
    pool: Pool<Sqlite>,
}

impl HeraldDatabase {
    /// Open or create the database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        Self::migrated(open_pool(path).await?).await
    }

    /// Fresh in-memory database with the full schema.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(open_pool_in_memory().await?).await
    }

    async fn migrated(pool: Pool<Sqlite>) -> Result<Self, DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        info!("Herald database migrations complete");
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
