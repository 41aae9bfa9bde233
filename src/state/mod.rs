/// Database state layer for the anchor service.
///
/// Manages PostgreSQL connections and provides typed access to:
/// - Anchor requests and their status lifecycle
/// - Produced anchors (one per published anchor commit)
/// - Per-stream metadata
pub mod models;
pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use models::{AnchorRecord, Request, RequestStatus, RequestUpdate, StreamMetadata};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                crate::error::CasError::Database(sqlx::Error::Migrate(Box::new(e)))
            })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Durable queue of anchor requests with status transitions.
#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Count requests currently in the given status.
    async fn count_by_status(&self, status: RequestStatus) -> Result<u64>;

    /// Atomically flip up to `max` READY requests to PROCESSING, earliest
    /// first, provided at least `min` are available. Two concurrent batch
    /// runners never share a request.
    async fn batch_processing(&self, min: usize, max: usize) -> Result<Vec<Request>>;

    /// Promote up to `max` PENDING requests to READY, earliest first,
    /// provided at least `min` are available.
    async fn find_and_mark_ready(&self, max: usize, min: usize) -> Result<Vec<Request>>;

    /// Re-touch READY requests older than the retry interval so the event
    /// emitter announces them again. Returns the number updated.
    async fn update_expiring_ready_requests(&self) -> Result<u64>;

    /// Apply a patch to the given requests. Returns the number updated.
    async fn update_requests(&self, patch: &RequestUpdate, ids: &[Uuid]) -> Result<u64>;

    /// Terminal pinned requests old enough to unpin.
    async fn find_requests_to_garbage_collect(&self) -> Result<Vec<Request>>;
}

/// Persistent record of produced anchors.
#[async_trait]
pub trait AnchorRepository: Send + Sync {
    /// Any prior anchor satisfying the given request.
    async fn find_by_request(&self, request_id: Uuid) -> Result<Option<AnchorRecord>>;

    /// Insert the batch's anchors and complete their requests in a single
    /// transaction at repeatable-read isolation.
    async fn persist_batch(
        &self,
        anchors: &[AnchorRecord],
        completed_request_ids: &[Uuid],
    ) -> Result<()>;
}

/// Per-stream metadata lookups.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn find_by_stream(&self, stream_id: &str) -> Result<Option<StreamMetadata>>;
}
