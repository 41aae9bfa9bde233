/// Anchor event emission.
///
/// Signals downstream batch workers that READY requests are waiting.
/// Emission failures are logged and swallowed: the READY expiry window
/// guarantees a later invocation re-emits for the same requests, so a
/// lost event only delays a batch.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CasError, Result};
use crate::metrics::BatchMetrics;
use crate::state::models::RequestStatus;
use crate::state::RequestRepository;

/// One "a batch is ready" signal, tagged with a fresh unique id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorBatchEvent {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl AnchorBatchEvent {
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at: Utc::now(),
        }
    }
}

impl Default for AnchorBatchEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination for anchor events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &AnchorBatchEvent) -> Result<()>;
}

/// Posts events to an HTTP webhook.
pub struct WebhookEventSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookEventSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl EventSink for WebhookEventSink {
    async fn emit(&self, event: &AnchorBatchEvent) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| CasError::Io(std::io::Error::other(e)))?;

        if !resp.status().is_success() {
            return Err(CasError::Io(std::io::Error::other(format!(
                "Event webhook returned {}",
                resp.status()
            ))));
        }

        Ok(())
    }
}

pub struct EventEmitter {
    requests: Arc<dyn RequestRepository>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<BatchMetrics>,
    max_stream_limit: usize,
    min_stream_count: usize,
}

impl EventEmitter {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<BatchMetrics>,
        max_stream_limit: usize,
        min_stream_count: usize,
    ) -> Self {
        Self {
            requests,
            sink,
            metrics,
            max_stream_limit,
            min_stream_count,
        }
    }

    /// Emit one anchor event if a batch is waiting. Returns whether an
    /// event went out.
    pub async fn emit_if_ready(&self) -> Result<bool> {
        let ready = self.requests.count_by_status(RequestStatus::Ready).await?;

        if ready > 0 {
            // READY requests already exist; only re-announce the ones
            // whose earlier event evidently went nowhere.
            let expired = self.requests.update_expiring_ready_requests().await?;
            if expired == 0 {
                return Ok(false);
            }
            info!(requests = expired, "Re-emitting for expired ready requests");
        } else {
            let marked = self
                .requests
                .find_and_mark_ready(self.max_stream_limit, self.min_stream_count)
                .await?;
            if marked.is_empty() {
                return Ok(false);
            }
            info!(requests = marked.len(), "Marked pending requests ready");
        }

        let event = AnchorBatchEvent::new();
        match self.sink.emit(&event).await {
            Ok(()) => {
                info!(event_id = %event.id, "Anchor event emitted");
                self.metrics.incr(&self.metrics.events_emitted);
                Ok(true)
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Event emission failed, expiry will retry");
                self.metrics.incr(&self.metrics.events_failed);
                Ok(false)
            }
        }
    }
}
