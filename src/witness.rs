/// Witness archives: the minimal slice of the content-addressed graph
/// proving one commit's inclusion under an on-chain Merkle root.
///
/// An archive holds the anchor commit, its proof block, the Merkle root,
/// and every internal node on the root-to-leaf walk, keyed by CID, with
/// the anchor commit registered as the single root. Verification is a
/// pure function of the archive: it decodes each block by its position
/// in the walk and checks that the walk terminates at the anchored
/// commit.
use std::collections::BTreeMap;

use crate::anchor::{AnchorCommit, ProofBlock};
use crate::cid::Cid;
use crate::error::{CasError, Result};
use crate::merkle::TreePath;
use crate::store::BlockStore;

/// Archive encoding version.
const ARCHIVE_VERSION: u8 = 1;

/// A self-contained, content-addressed block bundle with designated roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WitnessArchive {
    roots: Vec<Cid>,
    blocks: BTreeMap<Cid, Vec<u8>>,
}

impl WitnessArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block. Duplicate puts of the same content are idempotent.
    pub fn put_block(&mut self, data: Vec<u8>) -> Cid {
        let cid = Cid::of(&data);
        self.blocks.entry(cid).or_insert(data);
        cid
    }

    pub fn get_block(&self, cid: &Cid) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    /// Register a designated root.
    pub fn push_root(&mut self, cid: Cid) {
        if !self.roots.contains(&cid) {
            self.roots.push(cid);
        }
    }

    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Encode as a length-prefixed block sequence plus a roots list:
    /// `[version | root_count | roots... | block_count | (cid, len, bytes)...]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(ARCHIVE_VERSION);
        out.extend_from_slice(&(self.roots.len() as u32).to_le_bytes());
        for root in &self.roots {
            out.extend_from_slice(root.as_bytes());
        }
        out.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for (cid, data) in &self.blocks {
            out.extend_from_slice(cid.as_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    /// Decode an archive, re-deriving every block's CID from its bytes.
    /// A tampered block surfaces as a digest mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);

        let version = reader.take_u8()?;
        if version != ARCHIVE_VERSION {
            return Err(CasError::InvalidWitness(format!(
                "Unsupported archive version {version}"
            )));
        }

        let root_count = reader.take_u32()?;
        let mut roots = Vec::with_capacity(root_count as usize);
        for _ in 0..root_count {
            roots.push(Cid::from_bytes(reader.take_digest()?));
        }

        let block_count = reader.take_u32()?;
        let mut blocks = BTreeMap::new();
        for _ in 0..block_count {
            let recorded = Cid::from_bytes(reader.take_digest()?);
            let len = reader.take_u32()?;
            let data = reader.take_slice(len as usize)?.to_vec();
            let derived = Cid::of(&data);
            if derived != recorded {
                return Err(CasError::InvalidWitness(format!(
                    "Block digest mismatch: recorded {recorded}, derived {derived}"
                )));
            }
            blocks.insert(derived, data);
        }

        if !reader.is_empty() {
            return Err(CasError::InvalidWitness(
                "Trailing bytes after archive".into(),
            ));
        }

        Ok(Self { roots, blocks })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| CasError::InvalidWitness("Truncated archive".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take_slice(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32> {
        let slice = self.take_slice(4)?;
        Ok(u32::from_le_bytes(slice.try_into().expect("4-byte slice")))
    }

    fn take_digest(&mut self) -> Result<[u8; 32]> {
        let slice = self.take_slice(32)?;
        Ok(slice.try_into().expect("32-byte slice"))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Package the witness for one anchored commit: the anchor commit, its
/// proof, the Merkle root, and the internal nodes along `path`.
pub async fn build_witness(store: &dyn BlockStore, anchor_commit_cid: &Cid) -> Result<WitnessArchive> {
    let mut archive = WitnessArchive::new();

    let commit_bytes = store
        .get(anchor_commit_cid)
        .await?
        .ok_or_else(|| CasError::InvalidWitness(format!("Anchor commit {anchor_commit_cid} not found")))?;
    let commit: AnchorCommit = decode_record(&commit_bytes, "anchor commit")?;
    archive.put_block(commit_bytes);

    let proof_bytes = store
        .get(&commit.proof)
        .await?
        .ok_or_else(|| CasError::InvalidWitness(format!("Proof block {} not found", commit.proof)))?;
    let proof: ProofBlock = decode_record(&proof_bytes, "proof block")?;
    archive.put_block(proof_bytes);

    let root_bytes = store
        .get(&proof.root)
        .await?
        .ok_or_else(|| CasError::InvalidWitness(format!("Merkle root {} not found", proof.root)))?;
    archive.put_block(root_bytes.clone());

    // Walk the path, copying each internal node the walk passes through.
    // The final referenced CID is the anchored commit itself and is not
    // part of the witness.
    let path: TreePath = commit.path.parse()?;
    let mut current = root_bytes;
    for (i, step) in path.steps().iter().enumerate() {
        let node = decode_node(&current)?;
        let next = *node
            .get(step.index())
            .ok_or_else(|| CasError::InvalidWitness("Internal node missing a child".into()))?;

        if i + 1 == path.len() {
            break;
        }

        current = store
            .get(&next)
            .await?
            .ok_or_else(|| CasError::InvalidWitness(format!("Internal node {next} not found")))?;
        archive.put_block(current.clone());
    }

    archive.push_root(*anchor_commit_cid);
    Ok(archive)
}

/// Re-verify a witness archive by walking it back to the anchored
/// commit. Returns the anchor commit CID on success.
pub fn verify_witness(archive: &WitnessArchive) -> Result<Cid> {
    let [root] = archive.roots() else {
        return Err(CasError::InvalidWitness(format!(
            "Expected exactly one archive root, found {}",
            archive.roots().len()
        )));
    };
    let anchor_commit_cid = *root;

    let commit_bytes = archive
        .get_block(&anchor_commit_cid)
        .ok_or_else(|| CasError::InvalidWitness("Anchor commit missing from archive".into()))?;
    let commit: AnchorCommit = decode_record(commit_bytes, "anchor commit")?;

    let proof_bytes = archive
        .get_block(&commit.proof)
        .ok_or_else(|| CasError::InvalidWitness(format!("Proof block {} missing from archive", commit.proof)))?;
    let proof: ProofBlock = decode_record(proof_bytes, "proof block")?;

    archive
        .get_block(&proof.root)
        .ok_or_else(|| CasError::InvalidWitness(format!("Merkle root {} missing from archive", proof.root)))?;

    // Walk one step per digit. The final step lands on the anchored
    // commit itself, which the archive does not need to carry.
    let path: TreePath = commit.path.parse()?;
    let mut reached = proof.root;
    for step in path.steps() {
        let node_bytes = archive.get_block(&reached).ok_or_else(|| {
            CasError::InvalidWitness(format!("Internal node {reached} missing from archive"))
        })?;
        let node = decode_node(node_bytes)?;
        reached = *node
            .get(step.index())
            .ok_or_else(|| CasError::InvalidWitness("Internal node missing a child".into()))?;
    }

    if reached != commit.prev {
        return Err(CasError::InvalidWitness(format!(
            "Path terminates at {reached}, expected {}",
            commit.prev
        )));
    }

    Ok(anchor_commit_cid)
}

fn decode_record<'de, T: serde::Deserialize<'de>>(bytes: &'de [u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| CasError::InvalidWitness(format!("Undecodable {what}: {e}")))
}

/// An internal tree node: a 2-tuple of child CIDs, optionally followed
/// by a metadata CID.
fn decode_node(bytes: &[u8]) -> Result<Vec<Cid>> {
    let node: Vec<Cid> = serde_json::from_slice(bytes)
        .map_err(|e| CasError::InvalidWitness(format!("Undecodable internal node: {e}")))?;
    if node.len() < 2 {
        return Err(CasError::InvalidWitness(
            "Internal node is not a child tuple".into(),
        ));
    }
    Ok(node)
}
