/// Content-addressed block store abstraction.
///
/// The anchor pipeline writes Merkle internal nodes, proof blocks, and
/// anchor commits as opaque byte blocks keyed by their CID. Puts are
/// idempotent: storing the same bytes twice yields the same CID and a
/// single stored block. The store also carries the stream-tagged publish
/// used for anchor commits, and unpinning for garbage collection.
pub mod ipfs;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::cid::Cid;
use crate::error::{CasError, Result};

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Human-readable name of this store (e.g., "IPFS").
    fn name(&self) -> &str;

    /// Store a block. Returns its CID. Idempotent by CID.
    async fn put(&self, data: &[u8]) -> Result<Cid>;

    /// Retrieve a block by CID. Returns None if the block is unknown.
    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>>;

    /// Remove a pin. Returns Ok even if the block was never pinned.
    async fn unpin(&self, cid: &Cid) -> Result<()>;

    /// Store an anchor commit block and announce it for the given stream.
    async fn publish_anchor_commit(&self, data: &[u8], stream_id: &str) -> Result<Cid>;
}

/// Serialize a typed record and store it as a block.
pub async fn store_record<T: Serialize>(store: &dyn BlockStore, record: &T) -> Result<Cid> {
    let bytes = serde_json::to_vec(record).map_err(|e| CasError::Serialization(e.to_string()))?;
    store.put(&bytes).await
}
