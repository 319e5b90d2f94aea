//! Database testing infrastructure.
//!
//! Each [`TestEnv`] clones a fresh, uniquely-named database from the server
//! named by `TEST_DATABASE_URL` (falling back to `DATABASE_URL`), applies
//! the schema, and drops the database again on teardown. Tests running in
//! parallel therefore never observe each other's rows.

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    ConnectOptions, Connection, PgPool,
};
use tracing::{info, warn};
use uuid::Uuid;

use hookline_core::storage::{schema, Storage};

/// Isolated database environment for a single test.
pub struct TestEnv {
    pool: PgPool,
    storage: Storage,
    db_name: String,
    maintenance: PgConnectOptions,
}

impl TestEnv {
    /// Creates an isolated database, or `None` when no server is configured.
    ///
    /// Callers are expected to skip the test body on `None`:
    ///
    /// ```ignore
    /// let Some(env) = TestEnv::try_new().await else { return };
    /// ```
    pub async fn try_new() -> Option<Self> {
        let url = std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok()?;

        match Self::create(&url).await {
            Ok(env) => Some(env),
            Err(e) => {
                warn!(error = %e, "test database unavailable, skipping");
                None
            },
        }
    }

    async fn create(url: &str) -> Result<Self, sqlx::Error> {
        let maintenance: PgConnectOptions = url.parse()?;
        let db_name = format!("hookline_test_{}", Uuid::new_v4().simple());

        let mut conn = maintenance.connect().await?;
        sqlx::query(&format!(r#"CREATE DATABASE "{db_name}""#)).execute(&mut conn).await?;
        conn.close().await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(maintenance.clone().database(&db_name))
            .await?;

        schema::ensure_schema(&pool)
            .await
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

        info!(database = %db_name, "created isolated test database");

        let storage = Storage::new(pool.clone());
        Ok(Self { pool, storage, db_name, maintenance })
    }

    /// Connection pool for this database.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Repository container bound to this database.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let maintenance = self.maintenance.clone();
        let db_name = self.db_name.clone();
        let pool = self.pool.clone();

        // Teardown is best-effort; an orphaned test database is harmless.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pool.close().await;
                if let Ok(mut conn) = maintenance.connect().await {
                    let _ = sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{db_name}""#))
                        .execute(&mut conn)
                        .await;
                    let _ = conn.close().await;
                }
            });
        }
    }
}
