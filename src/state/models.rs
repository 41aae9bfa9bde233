/// Database models for the anchor service.
///
/// These structs map directly to PostgreSQL tables and are used
/// for both reading and writing via sqlx. CIDs are stored as hex text
/// and parsed at the domain boundary.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::cid::Cid;
use crate::error::Result;

/// Anchor request lifecycle status.
///
/// PENDING → READY → PROCESSING → {COMPLETED, FAILED}, with
/// PROCESSING → PENDING on batch revert and READY → PENDING on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Ready,
    Processing,
    Completed,
    Failed,
}

/// A client's request to anchor one stream commit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    /// Stream whose tip the client wants anchored.
    pub stream_id: String,
    /// The stream commit to anchor, as hex.
    pub cid: String,
    pub status: RequestStatus,
    /// Operator-facing status detail.
    pub message: Option<String>,
    /// Whether the stream's blocks are pinned on our node.
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// Parse the requested commit CID.
    pub fn commit_cid(&self) -> Result<Cid> {
        self.cid.parse()
    }
}

/// Partial update applied to a set of requests. Unset fields keep the
/// row's current value.
#[derive(Debug, Clone, Default)]
pub struct RequestUpdate {
    pub status: Option<RequestStatus>,
    pub message: Option<String>,
    pub pinned: Option<bool>,
}

impl RequestUpdate {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }
}

/// Persistent record of one published anchor commit.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    /// The newest accepted request this anchor satisfies.
    pub request_id: Uuid,
    /// CID of the proof block, as hex.
    pub proof_cid: String,
    /// Root-to-leaf path of this stream's leaf in the batch tree.
    pub path: String,
    /// CID of the anchor commit block, as hex.
    pub cid: String,
    pub created_at: DateTime<Utc>,
}

/// Per-stream metadata required to build a Merkle leaf.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub stream_id: String,
    /// The stream's init commit CID, as hex. Used as the anchor commit id.
    pub genesis_cid: String,
    /// Opaque stream header fields (controllers, model, ...).
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl StreamMetadata {
    pub fn genesis(&self) -> Result<Cid> {
        self.genesis_cid.parse()
    }
}
