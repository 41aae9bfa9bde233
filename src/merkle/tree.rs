/// Bounded-depth Merkle tree with content-addressed internal nodes.
///
/// Construction is a bottom-up merge. At each level adjacent pairs are
/// combined into a block `[leftCid, rightCid]` written to the store; the
/// store's digest of that block becomes the parent's identity. An odd
/// trailing node is promoted unchanged (not duplicated). The final merge
/// carries a third element: the CID of a metadata block aggregating the
/// batch's stream ids.
use serde::{Deserialize, Serialize};

use super::path::{Direction, TreePath};
use crate::cid::Cid;
use crate::error::{CasError, Result};
use crate::store::{store_record, BlockStore};

/// One tree leaf: a candidate's tip CID plus its owning stream.
#[derive(Debug, Clone)]
pub struct MerkleLeaf {
    pub cid: Cid,
    pub stream_id: String,
}

/// Batch-level aggregate attached to the root node.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeMetadata {
    pub num_entries: usize,
    pub stream_ids: Vec<String>,
}

/// A built tree. Levels hold CIDs only; `levels[0]` are the leaves and
/// the last level is the root.
pub struct MerkleTree {
    levels: Vec<Vec<Cid>>,
    leaves: Vec<MerkleLeaf>,
    metadata_cid: Option<Cid>,
}

impl MerkleTree {
    /// Build a tree over the given leaves, writing internal nodes to the
    /// store. `depth_limit` of 0 disables the cap.
    ///
    /// # Panics
    /// Panics on empty input; the orchestrator never builds an empty batch.
    pub async fn build(
        store: &dyn BlockStore,
        leaves: Vec<MerkleLeaf>,
        depth_limit: u32,
    ) -> Result<Self> {
        assert!(!leaves.is_empty(), "merkle tree requires at least one leaf");

        if depth_limit > 0 && leaves.len() > (1usize << depth_limit) {
            return Err(CasError::MerkleBuild(format!(
                "{} leaves exceed depth limit {depth_limit}",
                leaves.len()
            )));
        }

        let mut levels: Vec<Vec<Cid>> = vec![leaves.iter().map(|l| l.cid).collect()];

        let metadata_cid = if leaves.len() > 1 {
            let metadata = TreeMetadata {
                num_entries: leaves.len(),
                stream_ids: leaves.iter().map(|l| l.stream_id.clone()).collect(),
            };
            Some(
                store_record(store, &metadata)
                    .await
                    .map_err(|e| CasError::MerkleBuild(e.to_string()))?,
            )
        } else {
            None
        };

        while levels.last().map_or(0, Vec::len) > 1 {
            let current = &levels[levels.len() - 1];
            let is_root_merge = current.len() == 2;
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            let mut i = 0;
            while i + 1 < current.len() {
                let mut node = vec![current[i], current[i + 1]];
                if is_root_merge {
                    if let Some(meta) = metadata_cid {
                        node.push(meta);
                    }
                }
                let cid = store_record(store, &node)
                    .await
                    .map_err(|e| CasError::MerkleBuild(e.to_string()))?;
                next.push(cid);
                i += 2;
            }
            // Odd node: promote without duplication
            if i < current.len() {
                next.push(current[i]);
            }

            levels.push(next);
        }

        Ok(Self {
            levels,
            leaves,
            metadata_cid,
        })
    }

    /// The root CID. For a single-leaf tree this is the leaf itself.
    pub fn root(&self) -> Cid {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn leaves(&self) -> &[MerkleLeaf] {
        &self.leaves
    }

    /// Number of merge levels above the leaves.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn metadata_cid(&self) -> Option<Cid> {
        self.metadata_cid
    }

    /// Root-to-leaf walk for the leaf at `index`. Promoted nodes take no
    /// step, so paths may be shorter than the tree depth.
    pub fn path_to_leaf(&self, index: usize) -> Option<TreePath> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut steps = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = idx ^ 1;
            if sibling < level.len() {
                steps.push(if idx % 2 == 0 {
                    Direction::Left
                } else {
                    Direction::Right
                });
            }
            idx /= 2;
        }

        steps.reverse();
        Some(TreePath::new(steps))
    }
}
