/// Ethereum ledger adapter.
///
/// Submits the Merkle root digest in an Ethereum transaction, either as
/// raw calldata to the sender's own address or through the anchor
/// contract's `anchor(bytes32)` entry point. Uses raw JSON-RPC for
/// maximum compatibility; signing is local.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Ledger, LedgerTransaction};
use crate::cid::Cid;
use crate::error::{CasError, Result};

/// Seconds between transaction receipt polls.
const RECEIPT_POLL_INTERVAL_SECS: u64 = 3;
/// Receipt polls before the submission is declared lost.
const RECEIPT_POLL_ATTEMPTS: u32 = 40;

/// Configuration for Ethereum anchoring.
#[derive(Debug, Clone)]
pub struct EthereumConfig {
    /// Ethereum JSON-RPC endpoint (e.g., Infura, Alchemy, local node).
    pub rpc_url: String,
    /// Private key (hex, without 0x prefix) for signing transactions.
    /// In production, this would come from a KMS.
    pub private_key_hex: String,
    /// Chain ID (1 for mainnet, 11155111 for Sepolia).
    pub chain_id: u64,
    /// Anchor contract address. When set, roots are submitted through
    /// `anchor(bytes32)` instead of raw calldata.
    pub contract_address: Option<String>,
}

pub struct EthereumLedger {
    config: EthereumConfig,
    client: Client,
    caip2: String,
}

/// Simplified JSON-RPC response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

impl EthereumLedger {
    pub fn new(config: EthereumConfig) -> Self {
        let caip2 = format!("eip155:{}", config.chain_id);
        Self {
            config,
            client: Client::new(),
            caip2,
        }
    }

    /// Send a JSON-RPC request to the Ethereum node.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CasError::Ledger(format!("RPC transport error: {e}")))?
            .json()
            .await
            .map_err(|e| CasError::Ledger(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(CasError::Ledger(format!("RPC error: {}", err.message)));
        }

        resp.result
            .ok_or_else(|| CasError::Ledger("Empty RPC response".into()))
    }

    /// Build, sign, and send the anchoring transaction.
    async fn send_anchor_tx(&self, root: &Cid) -> Result<String> {
        use alloy::consensus::SignableTransaction;
        use alloy::primitives::{keccak256, Address, Bytes, TxKind, U256};
        use alloy::signers::local::PrivateKeySigner;
        use alloy::signers::Signer;

        let signer: PrivateKeySigner = self
            .config
            .private_key_hex
            .parse()
            .map_err(|e| CasError::Ledger(format!("Invalid private key: {e}")))?;

        let from_address = signer.address();

        // Raw mode sends the digest to self; contract mode calls anchor(bytes32).
        let (to, input) = match &self.config.contract_address {
            Some(addr) => {
                let contract: Address = addr
                    .parse()
                    .map_err(|e| CasError::Ledger(format!("Invalid contract address: {e}")))?;
                let selector = &keccak256(b"anchor(bytes32)")[..4];
                let mut calldata = Vec::with_capacity(4 + 32);
                calldata.extend_from_slice(selector);
                calldata.extend_from_slice(root.as_bytes());
                (TxKind::Call(contract), Bytes::from(calldata))
            }
            None => (
                TxKind::Call(from_address),
                Bytes::copy_from_slice(root.as_bytes()),
            ),
        };

        let nonce_hex: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from_address:?}"), "pending"]),
            )
            .await?;
        let nonce = parse_hex_u64(&nonce_hex)?;

        let gas_price_hex: String = self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = parse_hex_u128(&gas_price_hex)?;

        let tx = alloy::consensus::TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price,
            gas_limit: 60_000,
            to,
            value: U256::ZERO,
            input,
        };

        let sig_hash = tx.signature_hash();
        let sig = signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| CasError::Ledger(format!("Signing failed: {e}")))?;

        let signed = alloy::consensus::TxEnvelope::Legacy(tx.into_signed(sig));

        let mut raw_tx = Vec::new();
        alloy::eips::eip2718::Encodable2718::encode_2718(&signed, &mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        let tx_hash: String = self
            .rpc_call("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await?;

        Ok(tx_hash)
    }

    /// Poll for the transaction receipt and the including block's timestamp.
    async fn wait_for_inclusion(&self, tx_hash: &str) -> Result<(u64, u64)> {
        for attempt in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt: Option<serde_json::Value> = self
                .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await
                .unwrap_or(None);

            if let Some(receipt) = receipt {
                if let Some(block_hex) = receipt.get("blockNumber").and_then(|v| v.as_str()) {
                    let block_number = parse_hex_u64(block_hex)?;
                    let block: serde_json::Value = self
                        .rpc_call(
                            "eth_getBlockByNumber",
                            serde_json::json!([block_hex, false]),
                        )
                        .await?;
                    let timestamp_hex = block
                        .get("timestamp")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| CasError::Ledger("Block has no timestamp".into()))?;
                    return Ok((block_number, parse_hex_u64(timestamp_hex)?));
                }
            }

            debug!(tx_hash = %tx_hash, attempt, "Transaction not yet included, polling");
            tokio::time::sleep(Duration::from_secs(RECEIPT_POLL_INTERVAL_SECS)).await;
        }

        Err(CasError::Ledger(format!(
            "Transaction {tx_hash} not included after {RECEIPT_POLL_ATTEMPTS} polls"
        )))
    }
}

#[async_trait]
impl Ledger for EthereumLedger {
    fn chain_id(&self) -> &str {
        &self.caip2
    }

    async fn send_transaction(&self, root: &Cid) -> Result<LedgerTransaction> {
        let tx_hash_hex = self.send_anchor_tx(root).await?;
        info!(tx_hash = %tx_hash_hex, root = %root, "Anchor transaction submitted");

        let (block_number, block_timestamp) = self.wait_for_inclusion(&tx_hash_hex).await?;

        let hash_bytes = hex::decode(tx_hash_hex.trim_start_matches("0x"))
            .map_err(|e| CasError::Ledger(format!("Invalid transaction hash: {e}")))?;
        let tx_hash: [u8; 32] = hash_bytes
            .try_into()
            .map_err(|_| CasError::Ledger("Transaction hash is not 32 bytes".into()))?;

        Ok(LedgerTransaction {
            tx_hash,
            block_number,
            block_timestamp,
            chain_id: self.caip2.clone(),
        })
    }
}

fn parse_hex_u64(hex_str: &str) -> Result<u64> {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| CasError::Ledger(format!("Invalid hex quantity '{hex_str}': {e}")))
}

fn parse_hex_u128(hex_str: &str) -> Result<u128> {
    u128::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| CasError::Ledger(format!("Invalid hex quantity '{hex_str}': {e}")))
}
