/// Garbage collection of pinned streams.
///
/// Requests that reached a terminal status keep their stream's blocks
/// pinned so witnesses stay servable. Once the retention window passes,
/// this loop unpins the anchored commits and clears the pinned flag.
/// Per-request failures are logged and skipped; the next run retries.
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::state::models::RequestUpdate;
use crate::state::RequestRepository;
use crate::store::BlockStore;

/// Summary of one collection pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GcOutcome {
    pub scanned: usize,
    pub unpinned: usize,
}

pub struct GarbageCollector {
    requests: Arc<dyn RequestRepository>,
    store: Arc<dyn BlockStore>,
}

impl GarbageCollector {
    pub fn new(requests: Arc<dyn RequestRepository>, store: Arc<dyn BlockStore>) -> Self {
        Self { requests, store }
    }

    pub async fn run(&self) -> Result<GcOutcome> {
        let expired = self.requests.find_requests_to_garbage_collect().await?;
        let mut outcome = GcOutcome {
            scanned: expired.len(),
            ..GcOutcome::default()
        };

        let mut unpinned_ids: Vec<Uuid> = Vec::new();
        for request in &expired {
            let cid = match request.commit_cid() {
                Ok(cid) => cid,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "Skipping request with unparseable commit");
                    continue;
                }
            };

            if let Err(e) = self.store.unpin(&cid).await {
                warn!(request_id = %request.id, cid = %cid, error = %e, "Unpin failed, will retry next pass");
                continue;
            }
            unpinned_ids.push(request.id);
        }

        if !unpinned_ids.is_empty() {
            self.requests
                .update_requests(
                    &RequestUpdate::default().with_pinned(false),
                    &unpinned_ids,
                )
                .await?;
        }

        outcome.unpinned = unpinned_ids.len();
        info!(
            scanned = outcome.scanned,
            unpinned = outcome.unpinned,
            "Garbage collection pass complete"
        );
        Ok(outcome)
    }
}
