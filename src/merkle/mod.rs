/// Content-addressed Merkle trees over anchor candidates.
///
/// Each batch builds one bounded-depth binary tree whose leaves are the
/// candidates' tip CIDs in batch order. Internal nodes are blocks in the
/// content-addressed store; a node's CID is the store's digest of its
/// serialized child tuple. Anchor commits record a root-to-leaf path
/// through these tuples.
pub mod path;
pub mod tree;

pub use path::{Direction, TreePath};
pub use tree::{MerkleLeaf, MerkleTree};
