//! Database access layer implementing the repository pattern.
//!
//! The repositories are the only place SQL is written. Every cross-replica
//! coordination point (claim, attempt append, job lease, rate window) is a
//! single conditional statement; application code never does
//! read-modify-write against shared state.

use std::sync::Arc;

use sqlx::PgPool;

pub mod events;
pub mod queue;
pub mod schema;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for durable event records and their attempt history.
    pub events: Arc<events::Repository>,

    /// Repository for the delayed delivery job queue.
    pub queue: Arc<queue::Repository>,
}

impl Storage {
    /// Creates a new storage instance over a shared connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);
        Self {
            events: Arc::new(events::Repository::new(pool.clone())),
            queue: Arc::new(queue::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.events.pool()).await?;
        Ok(())
    }
}
