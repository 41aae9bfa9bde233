/// Candidate grouping and classification for one anchor batch.
///
/// Claimed requests are grouped by stream, resolved to a tip, ordered,
/// capped by the depth limit, and checked against prior anchors. The
/// result is an immutable classification record: every claimed request
/// lands in exactly one category, and the orchestrator drives status
/// transitions from the record alone.
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::cid::Cid;
use crate::error::Result;
use crate::state::models::{Request, StreamMetadata};
use crate::state::{AnchorRepository, MetadataRepository};

/// Status detail for requests whose stream or commit failed to load.
pub const MSG_COMMIT_LOAD_FAILED: &str = "Commit could not be loaded";
/// Status detail for requests satisfied by a previous batch.
pub const MSG_ALREADY_ANCHORED: &str = "Request already anchored";

/// One stream's requests grouped for a batch, with a chosen tip.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub stream_id: String,
    pub metadata: StreamMetadata,
    /// The stream's init commit CID; becomes the anchor commit id.
    pub genesis: Cid,
    /// The commit chosen as the tip to anchor.
    pub tip: Cid,
    pub accepted: Vec<Request>,
    /// Requests the conflict oracle rejected, with its reasons.
    pub rejected: Vec<(Request, String)>,
}

impl Candidate {
    /// Earliest request date across all member requests; defines batch order.
    pub fn earliest_request_date(&self) -> DateTime<Utc> {
        self.accepted
            .iter()
            .map(|r| r.created_at)
            .chain(self.rejected.iter().map(|(r, _)| r.created_at))
            .min()
            .expect("candidate holds at least one request")
    }

    /// The accepted request with the greatest `created_at`.
    pub fn newest_accepted(&self) -> &Request {
        self.accepted
            .iter()
            .max_by_key(|r| r.created_at)
            .expect("candidate holds at least one accepted request")
    }

    pub fn accepted_ids(&self) -> Vec<Uuid> {
        self.accepted.iter().map(|r| r.id).collect()
    }

    pub fn all_ids(&self) -> Vec<Uuid> {
        self.accepted
            .iter()
            .map(|r| r.id)
            .chain(self.rejected.iter().map(|(r, _)| r.id))
            .collect()
    }
}

/// A stream group that never became anchor-eligible.
#[derive(Debug, Clone)]
pub struct FailedCandidate {
    pub stream_id: String,
    pub requests: Vec<Request>,
    pub reason: String,
}

impl FailedCandidate {
    pub fn request_ids(&self) -> Vec<Uuid> {
        self.requests.iter().map(|r| r.id).collect()
    }
}

/// Disjoint classification of every claimed request.
#[derive(Debug, Default)]
pub struct BatchClassification {
    /// Candidates entering the Merkle tree, in batch order.
    pub accepted: Vec<Candidate>,
    /// Candidates whose newest accepted request already has an anchor.
    pub already_anchored: Vec<Candidate>,
    /// Stream groups whose metadata or commit failed to load.
    pub failed: Vec<FailedCandidate>,
    /// Stream groups fully rejected by the conflict oracle.
    pub conflicting: Vec<FailedCandidate>,
    /// Candidates beyond the batch cap, returned to the queue.
    pub unprocessed: Vec<Candidate>,
}

/// Outcome of consulting the stream network for one stream.
#[derive(Debug, Clone)]
pub struct TipResolution {
    pub tip: Cid,
    pub accepted: Vec<Uuid>,
    pub rejected: Vec<(Uuid, String)>,
}

/// The stream network's conflict-resolution logic, treated as an opaque
/// oracle. Consulted only when `load_stream_candidates` is enabled.
#[async_trait]
pub trait StreamOracle: Send + Sync {
    async fn resolve_tip(&self, stream_id: &str, requests: &[Request]) -> Result<TipResolution>;
}

/// Builds the batch classification from claimed requests.
pub struct CandidateBuilder<'a> {
    pub metadata: &'a dyn MetadataRepository,
    pub anchors: &'a dyn AnchorRepository,
    /// None bypasses stream loading: the newest request is the tip and
    /// every request is accepted.
    pub oracle: Option<&'a dyn StreamOracle>,
    /// Batch cap, `2^merkleDepthLimit`. None when the depth cap is off.
    pub stream_count_limit: Option<usize>,
}

impl CandidateBuilder<'_> {
    pub async fn classify(&self, claimed: Vec<Request>) -> Result<BatchClassification> {
        let mut groups: BTreeMap<String, Vec<Request>> = BTreeMap::new();
        for request in claimed {
            groups.entry(request.stream_id.clone()).or_default().push(request);
        }

        let mut classification = BatchClassification::default();
        let mut candidates = Vec::with_capacity(groups.len());

        for (stream_id, requests) in groups {
            match self.build_candidate(&stream_id, requests).await {
                GroupOutcome::Eligible(candidate) => candidates.push(candidate),
                GroupOutcome::LoadFailed(failed) => classification.failed.push(failed),
                GroupOutcome::Conflicting(failed) => classification.conflicting.push(failed),
            }
        }

        candidates.sort_by(|a, b| {
            a.earliest_request_date()
                .cmp(&b.earliest_request_date())
                .then_with(|| a.stream_id.cmp(&b.stream_id))
        });

        if let Some(limit) = self.stream_count_limit {
            if candidates.len() > limit {
                classification.unprocessed = candidates.split_off(limit);
            }
        }

        for candidate in candidates {
            let prior = self
                .anchors
                .find_by_request(candidate.newest_accepted().id)
                .await?;
            if prior.is_some() {
                classification.already_anchored.push(candidate);
            } else {
                classification.accepted.push(candidate);
            }
        }

        Ok(classification)
    }

    /// Resolve one stream group into a candidate, or a failure record.
    async fn build_candidate(&self, stream_id: &str, requests: Vec<Request>) -> GroupOutcome {
        let load_failure = |requests: Vec<Request>| {
            GroupOutcome::LoadFailed(FailedCandidate {
                stream_id: stream_id.to_string(),
                requests,
                reason: MSG_COMMIT_LOAD_FAILED.into(),
            })
        };

        let metadata = match self.metadata.find_by_stream(stream_id).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return load_failure(requests),
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Stream metadata load failed");
                return load_failure(requests);
            }
        };

        let genesis = match metadata.genesis() {
            Ok(genesis) => genesis,
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Stream genesis CID unparseable");
                return load_failure(requests);
            }
        };

        match self.oracle {
            None => {
                // Bypass mode: the newest request's commit is the tip.
                let newest = requests
                    .iter()
                    .max_by_key(|r| r.created_at)
                    .expect("group holds at least one request");
                let tip = match newest.commit_cid() {
                    Ok(tip) => tip,
                    Err(e) => {
                        warn!(stream_id = %stream_id, error = %e, "Request commit CID unparseable");
                        return load_failure(requests);
                    }
                };
                GroupOutcome::Eligible(Candidate {
                    stream_id: stream_id.to_string(),
                    metadata,
                    genesis,
                    tip,
                    accepted: requests,
                    rejected: vec![],
                })
            }
            Some(oracle) => {
                let resolution = match oracle.resolve_tip(stream_id, &requests).await {
                    Ok(resolution) => resolution,
                    Err(e) => {
                        warn!(stream_id = %stream_id, error = %e, "Stream load failed");
                        return load_failure(requests);
                    }
                };

                let rejections: BTreeMap<Uuid, String> = resolution.rejected.into_iter().collect();
                let mut accepted = Vec::new();
                let mut rejected = Vec::new();
                for request in requests {
                    match rejections.get(&request.id) {
                        Some(reason) => rejected.push((request, reason.clone())),
                        None if resolution.accepted.contains(&request.id) => accepted.push(request),
                        None => rejected.push((
                            request,
                            "Commit rejected by conflict resolution".to_string(),
                        )),
                    }
                }

                if accepted.is_empty() {
                    let reason = rejected
                        .first()
                        .map(|(_, reason)| reason.clone())
                        .unwrap_or_else(|| "Commit rejected by conflict resolution".to_string());
                    return GroupOutcome::Conflicting(FailedCandidate {
                        stream_id: stream_id.to_string(),
                        requests: rejected.into_iter().map(|(r, _)| r).collect(),
                        reason,
                    });
                }

                GroupOutcome::Eligible(Candidate {
                    stream_id: stream_id.to_string(),
                    metadata,
                    genesis,
                    tip: resolution.tip,
                    accepted,
                    rejected,
                })
            }
        }
    }
}

/// How one stream group resolved during candidate building.
enum GroupOutcome {
    Eligible(Candidate),
    LoadFailed(FailedCandidate),
    Conflicting(FailedCandidate),
}
