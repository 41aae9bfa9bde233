/// PostgreSQL repository implementations.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds. Claim
/// queries rely on `FOR UPDATE SKIP LOCKED` so cooperating batch runners
/// never share a request.
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{AnchorRecord, Request, RequestStatus, RequestUpdate, StreamMetadata};
use super::{AnchorRepository, MetadataRepository, RequestRepository};
use crate::error::Result;

pub struct PostgresRequestRepository {
    pool: PgPool,
    ready_retry_interval: Duration,
    gc_retention: Duration,
}

impl PostgresRequestRepository {
    pub fn new(pool: PgPool, ready_retry_interval_secs: u64, gc_retention_secs: u64) -> Self {
        Self {
            pool,
            ready_retry_interval: Duration::seconds(ready_retry_interval_secs as i64),
            gc_retention: Duration::seconds(gc_retention_secs as i64),
        }
    }

    /// Claim-style status flip: move up to `max` rows from `from` to `to`,
    /// earliest first, atomically. Rolls back when fewer than `min` match.
    async fn transition_batch(
        &self,
        from: RequestStatus,
        to: RequestStatus,
        min: usize,
        max: usize,
    ) -> Result<Vec<Request>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, Request>(
            r#"
            UPDATE anchor_requests SET status = $1, updated_at = $2
            WHERE id IN (
                SELECT id FROM anchor_requests
                WHERE status = $3
                ORDER BY created_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(to)
        .bind(Utc::now())
        .bind(from)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await?;

        if claimed.len() < min {
            tx.rollback().await?;
            return Ok(vec![]);
        }

        tx.commit().await?;
        Ok(claimed)
    }
}

#[async_trait]
impl RequestRepository for PostgresRequestRepository {
    async fn count_by_status(&self, status: RequestStatus) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM anchor_requests WHERE status = $1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn batch_processing(&self, min: usize, max: usize) -> Result<Vec<Request>> {
        self.transition_batch(RequestStatus::Ready, RequestStatus::Processing, min, max)
            .await
    }

    async fn find_and_mark_ready(&self, max: usize, min: usize) -> Result<Vec<Request>> {
        self.transition_batch(RequestStatus::Pending, RequestStatus::Ready, min, max)
            .await
    }

    async fn update_expiring_ready_requests(&self) -> Result<u64> {
        let horizon = Utc::now() - self.ready_retry_interval;

        let updated = sqlx::query(
            "UPDATE anchor_requests SET updated_at = $1 WHERE status = $2 AND updated_at < $3",
        )
        .bind(Utc::now())
        .bind(RequestStatus::Ready)
        .bind(horizon)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected())
    }

    async fn update_requests(&self, patch: &RequestUpdate, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let updated = sqlx::query(
            r#"
            UPDATE anchor_requests
            SET status = COALESCE($1, status),
                message = COALESCE($2, message),
                pinned = COALESCE($3, pinned),
                updated_at = $4
            WHERE id = ANY($5)
            "#,
        )
        .bind(patch.status)
        .bind(&patch.message)
        .bind(patch.pinned)
        .bind(Utc::now())
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected())
    }

    async fn find_requests_to_garbage_collect(&self) -> Result<Vec<Request>> {
        let horizon = Utc::now() - self.gc_retention;

        let requests = sqlx::query_as::<_, Request>(
            r#"
            SELECT * FROM anchor_requests
            WHERE status IN ($1, $2) AND pinned AND updated_at < $3
            ORDER BY updated_at ASC
            "#,
        )
        .bind(RequestStatus::Completed)
        .bind(RequestStatus::Failed)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        Ok(requests)
    }
}

pub struct PostgresAnchorRepository {
    pool: PgPool,
}

impl PostgresAnchorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnchorRepository for PostgresAnchorRepository {
    async fn find_by_request(&self, request_id: Uuid) -> Result<Option<AnchorRecord>> {
        let anchor =
            sqlx::query_as::<_, AnchorRecord>("SELECT * FROM anchors WHERE request_id = $1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(anchor)
    }

    async fn persist_batch(
        &self,
        anchors: &[AnchorRecord],
        completed_request_ids: &[Uuid],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        for anchor in anchors {
            sqlx::query(
                r#"
                INSERT INTO anchors (id, request_id, proof_cid, path, cid, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(anchor.id)
            .bind(anchor.request_id)
            .bind(&anchor.proof_cid)
            .bind(&anchor.path)
            .bind(&anchor.cid)
            .bind(anchor.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE anchor_requests
            SET status = $1, pinned = TRUE, message = $2, updated_at = $3
            WHERE id = ANY($4)
            "#,
        )
        .bind(RequestStatus::Completed)
        .bind("Anchored")
        .bind(Utc::now())
        .bind(completed_request_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

pub struct PostgresMetadataRepository {
    pool: PgPool,
}

impl PostgresMetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataRepository for PostgresMetadataRepository {
    async fn find_by_stream(&self, stream_id: &str) -> Result<Option<StreamMetadata>> {
        let metadata = sqlx::query_as::<_, StreamMetadata>(
            "SELECT * FROM stream_metadata WHERE stream_id = $1",
        )
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(metadata)
    }
}
