/// In-memory block store.
///
/// Backs local runs and tests with the same CID-keyed contract as the
/// IPFS adapter. Publishing degrades to a plain put.
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::BlockStore;
use crate::cid::Cid;
use crate::error::Result;

#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<BTreeMap<Cid, Vec<u8>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks held.
    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }

    pub async fn contains(&self, cid: &Cid) -> bool {
        self.blocks.read().await.contains_key(cid)
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = Cid::of(data);
        self.blocks
            .write()
            .await
            .entry(cid)
            .or_insert_with(|| data.to_vec());
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.read().await.get(cid).cloned())
    }

    async fn unpin(&self, _cid: &Cid) -> Result<()> {
        Ok(())
    }

    async fn publish_anchor_commit(&self, data: &[u8], _stream_id: &str) -> Result<Cid> {
        self.put(data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = MemoryBlockStore::new();
        let cid = store.put(b"block").await.unwrap();
        assert_eq!(store.get(&cid).await.unwrap().unwrap(), b"block");
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryBlockStore::new();
        let a = store.put(b"same").await.unwrap();
        let b = store.put(b"same").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let store = MemoryBlockStore::new();
        assert!(store.get(&Cid::of(b"missing")).await.unwrap().is_none());
    }
}
