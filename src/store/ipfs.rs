/// IPFS block store adapter via HTTP API.
///
/// Blocks are written through `/api/v0/block/put` against a Kubo-style
/// node (typically localhost:5001). The node's own multihash is ignored:
/// block identity throughout the service is the local BLAKE3 CID, so
/// witness verification never depends on a live node.
///
/// Anchor commits are additionally announced to the stream network
/// endpoint, if one is configured.
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use serde::Serialize;
use tracing::warn;

use super::BlockStore;
use crate::cid::Cid;
use crate::error::{CasError, Result};

/// Configuration for the IPFS adapter.
#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// IPFS API endpoint (e.g., "http://localhost:5001").
    pub api_url: String,
    /// Stream network endpoint that receives anchor commit announcements.
    /// When unset, publishing degrades to a plain block put.
    pub stream_api_url: Option<String>,
}

pub struct IpfsStore {
    client: Client,
    config: IpfsConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommitAnnouncement<'a> {
    stream_id: &'a str,
    commit: Cid,
}

impl IpfsStore {
    pub fn new(config: IpfsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

fn http_err(e: reqwest::Error) -> CasError {
    CasError::Io(std::io::Error::other(e))
}

#[async_trait]
impl BlockStore for IpfsStore {
    fn name(&self) -> &str {
        "IPFS"
    }

    async fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = Cid::of(data);

        let part = multipart::Part::bytes(data.to_vec()).file_name("block");
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/api/v0/block/put", self.config.api_url))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await
            .map_err(http_err)?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CasError::Io(std::io::Error::other(format!(
                "IPFS block put failed: {body}"
            ))));
        }

        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .post(format!("{}/api/v0/block/get", self.config.api_url))
            .query(&[("arg", cid.to_string())])
            .send()
            .await
            .map_err(http_err)?;

        if !resp.status().is_success() {
            return Ok(None);
        }

        let bytes = resp.bytes().await.map_err(http_err)?;
        Ok(Some(bytes.to_vec()))
    }

    /// Unpin a block. Absent pins are not an error.
    async fn unpin(&self, cid: &Cid) -> Result<()> {
        let _ = self
            .client
            .post(format!("{}/api/v0/pin/rm", self.config.api_url))
            .query(&[("arg", cid.to_string())])
            .send()
            .await;

        Ok(())
    }

    async fn publish_anchor_commit(&self, data: &[u8], stream_id: &str) -> Result<Cid> {
        let cid = self.put(data).await?;

        let Some(stream_api_url) = &self.config.stream_api_url else {
            warn!(
                stream_id = %stream_id,
                commit = %cid,
                "No stream network endpoint configured, anchor commit stored but not announced"
            );
            return Ok(cid);
        };

        let announcement = CommitAnnouncement {
            stream_id,
            commit: cid,
        };
        let resp = self
            .client
            .post(format!("{stream_api_url}/api/v0/commits"))
            .json(&announcement)
            .send()
            .await
            .map_err(http_err)?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CasError::Io(std::io::Error::other(format!(
                "Anchor commit announcement failed: {body}"
            ))));
        }

        Ok(cid)
    }
}
