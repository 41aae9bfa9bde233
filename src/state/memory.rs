/// In-memory repository fakes for orchestrator and emitter tests.
///
/// Semantics mirror the PostgreSQL implementations: claims are earliest
/// first and all-or-nothing below the minimum, persist completes the
/// requests it anchors, and patches keep unset fields.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::models::{AnchorRecord, Request, RequestStatus, RequestUpdate, StreamMetadata};
use super::{AnchorRepository, MetadataRepository, RequestRepository};
use crate::error::{CasError, Result};
use tokio::sync::RwLock;

pub struct MemoryRequestRepository {
    requests: RwLock<BTreeMap<Uuid, Request>>,
    ready_retry_interval: Duration,
    gc_retention: Duration,
}

impl MemoryRequestRepository {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(BTreeMap::new()),
            ready_retry_interval: Duration::seconds(300),
            gc_retention: Duration::seconds(0),
        }
    }

    pub async fn insert(&self, request: Request) {
        self.requests.write().await.insert(request.id, request);
    }

    pub async fn get(&self, id: Uuid) -> Option<Request> {
        self.requests.read().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Request> {
        self.requests.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl RequestRepository for MemoryRequestRepository {
    async fn count_by_status(&self, status: RequestStatus) -> Result<u64> {
        let requests = self.requests.read().await;
        Ok(requests.values().filter(|r| r.status == status).count() as u64)
    }

    async fn batch_processing(&self, min: usize, max: usize) -> Result<Vec<Request>> {
        transition(&self.requests, RequestStatus::Ready, RequestStatus::Processing, min, max).await
    }

    async fn find_and_mark_ready(&self, max: usize, min: usize) -> Result<Vec<Request>> {
        transition(&self.requests, RequestStatus::Pending, RequestStatus::Ready, min, max).await
    }

    async fn update_expiring_ready_requests(&self) -> Result<u64> {
        let horizon = Utc::now() - self.ready_retry_interval;
        let mut requests = self.requests.write().await;
        let mut updated = 0;
        for request in requests.values_mut() {
            if request.status == RequestStatus::Ready && request.updated_at < horizon {
                request.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn update_requests(&self, patch: &RequestUpdate, ids: &[Uuid]) -> Result<u64> {
        let mut requests = self.requests.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(request) = requests.get_mut(id) {
                if let Some(status) = patch.status {
                    request.status = status;
                }
                if let Some(message) = &patch.message {
                    request.message = Some(message.clone());
                }
                if let Some(pinned) = patch.pinned {
                    request.pinned = pinned;
                }
                request.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn find_requests_to_garbage_collect(&self) -> Result<Vec<Request>> {
        let horizon = Utc::now() - self.gc_retention;
        let requests = self.requests.read().await;
        Ok(requests
            .values()
            .filter(|r| {
                matches!(r.status, RequestStatus::Completed | RequestStatus::Failed)
                    && r.pinned
                    && r.updated_at <= horizon
            })
            .cloned()
            .collect())
    }
}

async fn transition(
    requests: &RwLock<BTreeMap<Uuid, Request>>,
    from: RequestStatus,
    to: RequestStatus,
    min: usize,
    max: usize,
) -> Result<Vec<Request>> {
    let mut requests = requests.write().await;

    let mut eligible: Vec<Uuid> = requests
        .values()
        .filter(|r| r.status == from)
        .map(|r| r.id)
        .collect();
    eligible.sort_by_key(|id| requests[id].created_at);
    eligible.truncate(max);

    if eligible.len() < min {
        return Ok(vec![]);
    }

    let mut claimed = Vec::with_capacity(eligible.len());
    for id in eligible {
        let request = requests.get_mut(&id).expect("id came from this map");
        request.status = to;
        request.updated_at = Utc::now();
        claimed.push(request.clone());
    }
    Ok(claimed)
}

pub struct MemoryAnchorRepository {
    anchors: RwLock<Vec<AnchorRecord>>,
    requests: Arc<MemoryRequestRepository>,
    fail_next_persist: AtomicBool,
}

impl MemoryAnchorRepository {
    pub fn new(requests: Arc<MemoryRequestRepository>) -> Self {
        Self {
            anchors: RwLock::new(Vec::new()),
            requests,
            fail_next_persist: AtomicBool::new(false),
        }
    }

    pub fn fail_next_persist(&self) {
        self.fail_next_persist.store(true, Ordering::SeqCst);
    }

    pub async fn insert(&self, anchor: AnchorRecord) {
        self.anchors.write().await.push(anchor);
    }

    pub async fn all(&self) -> Vec<AnchorRecord> {
        self.anchors.read().await.clone()
    }
}

#[async_trait]
impl AnchorRepository for MemoryAnchorRepository {
    async fn find_by_request(&self, request_id: Uuid) -> Result<Option<AnchorRecord>> {
        let anchors = self.anchors.read().await;
        Ok(anchors.iter().find(|a| a.request_id == request_id).cloned())
    }

    async fn persist_batch(
        &self,
        anchors: &[AnchorRecord],
        completed_request_ids: &[Uuid],
    ) -> Result<()> {
        if self.fail_next_persist.swap(false, Ordering::SeqCst) {
            return Err(CasError::Persist("injected persist failure".into()));
        }

        self.anchors.write().await.extend_from_slice(anchors);
        self.requests
            .update_requests(
                &RequestUpdate::status(RequestStatus::Completed)
                    .with_message("Anchored")
                    .with_pinned(true),
                completed_request_ids,
            )
            .await?;
        Ok(())
    }
}

pub struct MemoryMetadataRepository {
    streams: RwLock<BTreeMap<String, StreamMetadata>>,
}

impl MemoryMetadataRepository {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn insert(&self, metadata: StreamMetadata) {
        self.streams
            .write()
            .await
            .insert(metadata.stream_id.clone(), metadata);
    }
}

#[async_trait]
impl MetadataRepository for MemoryMetadataRepository {
    async fn find_by_stream(&self, stream_id: &str) -> Result<Option<StreamMetadata>> {
        Ok(self.streams.read().await.get(stream_id).cloned())
    }
}
