/// Ledger adapters: one transaction per batch carrying the Merkle root.
///
/// The orchestrator serializes calls to `send_transaction` behind its
/// transaction mutex, so an adapter never has two submissions in flight
/// for the same account.
pub mod ethereum;

use async_trait::async_trait;

use crate::cid::Cid;
use crate::error::Result;

/// Record of a confirmed anchoring transaction.
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    /// Raw 32-byte transaction hash.
    pub tx_hash: [u8; 32],
    /// Block that included the transaction.
    pub block_number: u64,
    /// Timestamp of that block (seconds since epoch).
    pub block_timestamp: u64,
    /// CAIP-2 chain identifier (e.g., "eip155:1").
    pub chain_id: String,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// CAIP-2 identifier of the backing chain.
    fn chain_id(&self) -> &str;

    /// Submit one transaction carrying the Merkle root digest and wait
    /// for inclusion.
    async fn send_transaction(&self, root: &Cid) -> Result<LedgerTransaction>;
}
