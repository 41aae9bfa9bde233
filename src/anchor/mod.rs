/// Anchoring pipeline: candidate classification, batch orchestration,
/// and the wire records published to the block store.
///
/// One batch produces a single proof block tied to one on-chain
/// transaction, plus one anchor commit per accepted stream:
///
/// ```text
/// requests ──▶ candidates ──▶ Merkle tree ──▶ ledger tx
///                                  │              │
///                                  ▼              ▼
///                           anchor commits ◀── proof block
/// ```
pub mod batch;
pub mod candidates;

use serde::{Deserialize, Serialize};

use crate::cid::Cid;

/// Transaction type recorded in proofs created through the anchor contract.
pub const CONTRACT_TX_TYPE: &str = "f(bytes32)";

/// A content-addressed record binding a stream's tip to an on-chain proof
/// via a Merkle path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorCommit {
    /// The stream's init commit CID.
    pub id: Cid,
    /// The stream commit being anchored.
    pub prev: Cid,
    /// The batch's proof block.
    pub proof: Cid,
    /// Root-to-leaf walk, slash-delimited binary digits. Empty for a
    /// single-leaf tree.
    pub path: String,
}

/// The record tying a Merkle root to a specific on-chain transaction.
/// Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBlock {
    pub block_number: u64,
    pub block_timestamp: u64,
    /// The batch's Merkle root.
    pub root: Cid,
    /// CAIP-2 chain identifier.
    pub chain_id: String,
    /// The raw 32-byte transaction hash, wrapped as a CID.
    pub tx_hash: Cid,
    /// Present iff the transaction went through the anchor contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_commit_wire_format() {
        let commit = AnchorCommit {
            id: Cid::of(b"genesis"),
            prev: Cid::of(b"tip"),
            proof: Cid::of(b"proof"),
            path: "0/1".into(),
        };

        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&commit).unwrap()).unwrap();
        assert!(json.get("id").is_some());
        assert!(json.get("prev").is_some());
        assert!(json.get("proof").is_some());
        assert_eq!(json["path"], "0/1");
    }

    #[test]
    fn test_proof_omits_absent_tx_type() {
        let proof = ProofBlock {
            block_number: 7,
            block_timestamp: 1_700_000_000,
            root: Cid::of(b"root"),
            chain_id: "eip155:1".into(),
            tx_hash: Cid::from_bytes([0x11; 32]),
            tx_type: None,
        };

        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&proof).unwrap()).unwrap();
        assert!(json.get("txType").is_none());
        assert_eq!(json["chainId"], "eip155:1");
        assert_eq!(json["blockNumber"], 7);
    }

    #[test]
    fn test_proof_carries_contract_tx_type() {
        let proof = ProofBlock {
            block_number: 7,
            block_timestamp: 1_700_000_000,
            root: Cid::of(b"root"),
            chain_id: "eip155:1".into(),
            tx_hash: Cid::from_bytes([0x11; 32]),
            tx_type: Some(CONTRACT_TX_TYPE.into()),
        };

        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&proof).unwrap()).unwrap();
        assert_eq!(json["txType"], "f(bytes32)");
    }
}
