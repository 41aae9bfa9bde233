/// Anchor batch orchestrator.
///
/// Runs one batch end to end: claims READY requests, classifies them
/// into candidates, builds the Merkle tree, commits the root on chain
/// under the transaction mutex, publishes the proof block and one
/// anchor commit per accepted stream, and persists the results in a
/// single database transaction.
///
/// Failure handling is class-based: a per-stream publish error fails
/// only that candidate's requests and the batch continues; any fatal
/// error before persistence reverts the still-accepted requests to
/// PENDING so the next run retries them; a persistence failure after
/// the external side effects keeps everything for reconciliation.
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::candidates::{
    BatchClassification, Candidate, CandidateBuilder, StreamOracle, MSG_ALREADY_ANCHORED,
};
use super::{AnchorCommit, ProofBlock, CONTRACT_TX_TYPE};
use crate::cid::Cid;
use crate::config::CasConfig;
use crate::error::{CasError, Result};
use crate::ledger::Ledger;
use crate::merkle::{MerkleLeaf, MerkleTree};
use crate::metrics::BatchMetrics;
use crate::state::models::{AnchorRecord, RequestStatus, RequestUpdate};
use crate::state::{AnchorRepository, MetadataRepository, RequestRepository};
use crate::store::{store_record, BlockStore};

/// Status detail for requests failed by a per-stream publish error.
const MSG_COMMIT_PUBLISH_FAILED: &str = "Anchor commit could not be published";
/// Status detail for requests returned to the queue after a fatal error.
const MSG_REVERTED: &str = "Reverted to pending after a failed batch";

/// Summary of one `run_batch` invocation.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub anchored_streams: usize,
    pub completed_requests: usize,
    pub failed_requests: usize,
    pub already_anchored_requests: usize,
    pub unprocessed_requests: usize,
    pub reverted_requests: usize,
    pub root: Option<Cid>,
    pub tx_hash: Option<Cid>,
}

pub struct BatchOrchestrator {
    store: Arc<dyn BlockStore>,
    ledger: Arc<dyn Ledger>,
    requests: Arc<dyn RequestRepository>,
    anchors: Arc<dyn AnchorRepository>,
    metadata: Arc<dyn MetadataRepository>,
    oracle: Option<Arc<dyn StreamOracle>>,
    metrics: Arc<BatchMetrics>,
    config: CasConfig,
    /// Serializes ledger submissions: one in-flight transaction per account.
    tx_mutex: Mutex<()>,
}

impl BatchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn BlockStore>,
        ledger: Arc<dyn Ledger>,
        requests: Arc<dyn RequestRepository>,
        anchors: Arc<dyn AnchorRepository>,
        metadata: Arc<dyn MetadataRepository>,
        oracle: Option<Arc<dyn StreamOracle>>,
        metrics: Arc<BatchMetrics>,
        config: CasConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            requests,
            anchors,
            metadata,
            oracle,
            metrics,
            config,
            tx_mutex: Mutex::new(()),
        }
    }

    /// Execute one anchor batch, or a no-op if not enough requests are
    /// READY. Returns only after all durable state reflects the outcome.
    pub async fn run_batch(&self) -> Result<BatchOutcome> {
        self.metrics.incr(&self.metrics.batches_run);

        let claimed = self
            .requests
            .batch_processing(self.config.min_stream_count, self.config.max_stream_limit)
            .await?;

        if claimed.is_empty() {
            info!("Not enough ready requests, skipping batch");
            self.metrics.incr(&self.metrics.batches_empty);
            return Ok(BatchOutcome::default());
        }

        let claimed_ids: Vec<Uuid> = claimed.iter().map(|r| r.id).collect();
        let mut outcome = BatchOutcome {
            claimed: claimed.len(),
            ..BatchOutcome::default()
        };
        self.metrics.add(&self.metrics.requests_claimed, claimed.len());
        info!(requests = claimed.len(), "Claimed requests for anchoring");

        // Candidate build and non-selected bookkeeping. A failure here
        // leaves every claimed request PROCESSING, so revert them all.
        let builder = CandidateBuilder {
            metadata: self.metadata.as_ref(),
            anchors: self.anchors.as_ref(),
            oracle: self.oracle.as_deref(),
            stream_count_limit: self.config.stream_count_limit(),
        };
        let classification = match builder.classify(claimed).await {
            Ok(classification) => classification,
            Err(e) => return self.revert(&claimed_ids, &mut outcome, e).await,
        };
        if let Err(e) = self
            .transition_non_selected(&classification, &mut outcome)
            .await
        {
            return self.revert(&claimed_ids, &mut outcome, e).await;
        }

        if classification.accepted.is_empty() {
            info!("No anchor-eligible candidates in this batch");
            self.metrics.incr(&self.metrics.batches_empty);
            return Ok(outcome);
        }

        let accepted = classification.accepted;
        let mut active: Vec<Uuid> = accepted.iter().flat_map(|c| c.accepted_ids()).collect();

        match self
            .anchor_candidates(&accepted, &mut active, &mut outcome)
            .await
        {
            Ok(()) => {
                info!(
                    streams = outcome.anchored_streams,
                    completed = outcome.completed_requests,
                    failed = outcome.failed_requests,
                    root = %outcome.root.map(|c| c.to_string()).unwrap_or_default(),
                    "Anchor batch complete"
                );
                Ok(outcome)
            }
            Err(e @ CasError::Persist(_)) => {
                // On-chain and block-store state exist; rolling the requests
                // back would re-anchor them. Leave them for reconciliation.
                self.metrics.incr(&self.metrics.persist_failures);
                error!(
                    error = %e,
                    root = %outcome.root.map(|c| c.to_string()).unwrap_or_default(),
                    "External side effects are committed but the database is not, manual reconciliation required"
                );
                Err(e)
            }
            Err(e) => self.revert(&active, &mut outcome, e).await,
        }
    }

    /// Steps 6-10: Merkle build, ledger commit, proof and anchor commit
    /// publication, transactional persistence. `active` tracks requests
    /// still owned by the batch; per-candidate failures drop out of it.
    async fn anchor_candidates(
        &self,
        accepted: &[Candidate],
        active: &mut Vec<Uuid>,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let leaves: Vec<MerkleLeaf> = accepted
            .iter()
            .map(|c| MerkleLeaf {
                cid: c.tip,
                stream_id: c.stream_id.clone(),
            })
            .collect();
        let tree =
            MerkleTree::build(self.store.as_ref(), leaves, self.config.merkle_depth_limit).await?;
        let root = tree.root();
        outcome.root = Some(root);
        info!(root = %root, leaves = tree.leaf_count(), depth = tree.depth(), "Merkle tree built");

        let transaction = {
            let _guard = self.tx_mutex.lock().await;
            self.ledger.send_transaction(&root).await
        }?;
        let tx_hash = Cid::from_bytes(transaction.tx_hash);
        outcome.tx_hash = Some(tx_hash);
        info!(
            tx_hash = %tx_hash,
            block_number = transaction.block_number,
            chain_id = %transaction.chain_id,
            "Merkle root committed on chain"
        );

        let proof = ProofBlock {
            block_number: transaction.block_number,
            block_timestamp: transaction.block_timestamp,
            root,
            chain_id: transaction.chain_id,
            tx_hash,
            tx_type: self
                .config
                .use_smart_contract_anchors
                .then(|| CONTRACT_TX_TYPE.to_string()),
        };
        let proof_cid = store_record(self.store.as_ref(), &proof)
            .await
            .map_err(|e| CasError::ProofPublish(e.to_string()))?;

        let mut anchors = Vec::with_capacity(accepted.len());
        let mut completed: Vec<Uuid> = Vec::new();
        for (index, candidate) in accepted.iter().enumerate() {
            let path = tree
                .path_to_leaf(index)
                .expect("accepted candidates map one-to-one to leaves")
                .to_string();
            let commit = AnchorCommit {
                id: candidate.genesis,
                prev: candidate.tip,
                proof: proof_cid,
                path: path.clone(),
            };
            let bytes =
                serde_json::to_vec(&commit).map_err(|e| CasError::Serialization(e.to_string()))?;

            match self
                .store
                .publish_anchor_commit(&bytes, &candidate.stream_id)
                .await
            {
                Ok(commit_cid) => {
                    anchors.push(AnchorRecord {
                        id: Uuid::now_v7(),
                        request_id: candidate.newest_accepted().id,
                        proof_cid: proof_cid.to_string(),
                        path,
                        cid: commit_cid.to_string(),
                        created_at: Utc::now(),
                    });
                    completed.extend(candidate.accepted_ids());
                    outcome.anchored_streams += 1;
                }
                Err(e) => {
                    let publish_error = CasError::AnchorCommitPublish {
                        stream_id: candidate.stream_id.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %publish_error, "Continuing batch without this candidate");
                    self.metrics.incr(&self.metrics.anchor_publish_failures);

                    let ids = candidate.accepted_ids();
                    self.requests
                        .update_requests(
                            &RequestUpdate::status(RequestStatus::Failed)
                                .with_message(MSG_COMMIT_PUBLISH_FAILED),
                            &ids,
                        )
                        .await?;
                    active.retain(|id| !ids.contains(id));
                    outcome.failed_requests += ids.len();
                    self.metrics.add(&self.metrics.requests_failed, ids.len());
                }
            }
        }

        if anchors.is_empty() {
            warn!("No anchor commits published, nothing to persist");
            return Ok(());
        }

        self.anchors
            .persist_batch(&anchors, &completed)
            .await
            .map_err(|e| CasError::Persist(e.to_string()))?;
        active.clear();
        outcome.completed_requests += completed.len();
        self.metrics
            .add(&self.metrics.requests_completed, completed.len());
        Ok(())
    }

    /// Step 4: bounded status updates for everything that will not enter
    /// the Merkle tree.
    async fn transition_non_selected(
        &self,
        classification: &BatchClassification,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        for failed in classification
            .failed
            .iter()
            .chain(&classification.conflicting)
        {
            let ids = failed.request_ids();
            self.requests
                .update_requests(
                    &RequestUpdate::status(RequestStatus::Failed)
                        .with_message(failed.reason.as_str()),
                    &ids,
                )
                .await?;
            warn!(
                stream_id = %failed.stream_id,
                requests = ids.len(),
                reason = %failed.reason,
                "Requests failed candidate building"
            );
            outcome.failed_requests += ids.len();
            self.metrics.add(&self.metrics.requests_failed, ids.len());
        }

        // Requests the oracle rejected inside otherwise-accepted candidates.
        for candidate in &classification.accepted {
            for (request, reason) in &candidate.rejected {
                self.requests
                    .update_requests(
                        &RequestUpdate::status(RequestStatus::Failed)
                            .with_message(reason.as_str()),
                        &[request.id],
                    )
                    .await?;
                outcome.failed_requests += 1;
                self.metrics.add(&self.metrics.requests_failed, 1);
            }
        }

        for candidate in &classification.already_anchored {
            let ids = candidate.all_ids();
            self.requests
                .update_requests(
                    &RequestUpdate::status(RequestStatus::Completed)
                        .with_message(MSG_ALREADY_ANCHORED)
                        .with_pinned(true),
                    &ids,
                )
                .await?;
            info!(stream_id = %candidate.stream_id, "Stream already anchored");
            outcome.already_anchored_requests += ids.len();
            self.metrics.incr(&self.metrics.candidates_already_anchored);
            self.metrics.add(&self.metrics.requests_completed, ids.len());
        }

        if !classification.unprocessed.is_empty() {
            let ids: Vec<Uuid> = classification
                .unprocessed
                .iter()
                .flat_map(|c| c.all_ids())
                .collect();
            self.requests
                .update_requests(&RequestUpdate::status(RequestStatus::Pending), &ids)
                .await?;
            info!(
                candidates = classification.unprocessed.len(),
                "Batch capacity exceeded, tail candidates returned to the queue"
            );
            outcome.unprocessed_requests += ids.len();
            self.metrics.add(
                &self.metrics.candidates_unprocessed,
                classification.unprocessed.len(),
            );
        }

        self.metrics.add(
            &self.metrics.candidates_accepted,
            classification.accepted.len(),
        );
        Ok(())
    }

    /// Step 11: return still-owned requests to PENDING and surface the
    /// original error.
    async fn revert(
        &self,
        ids: &[Uuid],
        outcome: &mut BatchOutcome,
        cause: CasError,
    ) -> Result<BatchOutcome> {
        match &cause {
            CasError::MerkleBuild(_) => self.metrics.incr(&self.metrics.merkle_build_failures),
            CasError::Ledger(_) => self.metrics.incr(&self.metrics.ledger_failures),
            CasError::ProofPublish(_) => self.metrics.incr(&self.metrics.proof_publish_failures),
            _ => {}
        }

        warn!(requests = ids.len(), error = %cause, "Reverting batch to pending");
        match self
            .requests
            .update_requests(
                &RequestUpdate::status(RequestStatus::Pending).with_message(MSG_REVERTED),
                ids,
            )
            .await
        {
            Ok(reverted) => {
                outcome.reverted_requests = reverted as usize;
                self.metrics
                    .add(&self.metrics.requests_reverted, reverted as usize);
            }
            Err(e) => {
                error!(error = %e, "Failed to revert requests to pending");
            }
        }

        Err(cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTransaction;
    use crate::state::memory::{
        MemoryAnchorRepository, MemoryMetadataRepository, MemoryRequestRepository,
    };
    use crate::state::models::{Request, StreamMetadata};
    use crate::store::memory::MemoryBlockStore;
    use crate::witness::{build_witness, verify_witness};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Ledger fake: fixed transaction record, optional leading failures,
    /// and an in-flight gauge for the mutex invariant.
    struct StaticLedger {
        calls: AtomicUsize,
        fail_first: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl StaticLedger {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing_once() -> Self {
            let ledger = Self::new();
            ledger.fail_first.store(1, Ordering::SeqCst);
            ledger
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Ledger for StaticLedger {
        fn chain_id(&self) -> &str {
            "eip155:1337"
        }

        async fn send_transaction(&self, _root: &Cid) -> Result<LedgerTransaction> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CasError::Ledger("nonce too low".into()));
            }

            Ok(LedgerTransaction {
                tx_hash: [0xab; 32],
                block_number: 100,
                block_timestamp: 1_700_000_000,
                chain_id: "eip155:1337".into(),
            })
        }
    }

    /// Block store that rejects anchor commit publishes for one stream.
    struct FlakyPublishStore {
        inner: MemoryBlockStore,
        failing_stream: String,
    }

    #[async_trait]
    impl BlockStore for FlakyPublishStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn put(&self, data: &[u8]) -> Result<Cid> {
            self.inner.put(data).await
        }

        async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
            self.inner.get(cid).await
        }

        async fn unpin(&self, cid: &Cid) -> Result<()> {
            self.inner.unpin(cid).await
        }

        async fn publish_anchor_commit(&self, data: &[u8], stream_id: &str) -> Result<Cid> {
            if stream_id == self.failing_stream {
                return Err(CasError::Io(std::io::Error::other("publish rejected")));
            }
            self.inner.publish_anchor_commit(data, stream_id).await
        }
    }

    struct Harness {
        store: Arc<MemoryBlockStore>,
        ledger: Arc<StaticLedger>,
        requests: Arc<MemoryRequestRepository>,
        anchors: Arc<MemoryAnchorRepository>,
        metadata: Arc<MemoryMetadataRepository>,
        orchestrator: BatchOrchestrator,
    }

    fn test_config() -> CasConfig {
        CasConfig {
            merkle_depth_limit: 2,
            min_stream_count: 1,
            max_stream_limit: 8,
            ..CasConfig::default()
        }
    }

    fn harness_with(config: CasConfig, ledger: StaticLedger) -> Harness {
        let store = Arc::new(MemoryBlockStore::new());
        let ledger = Arc::new(ledger);
        let requests = Arc::new(MemoryRequestRepository::new());
        let anchors = Arc::new(MemoryAnchorRepository::new(requests.clone()));
        let metadata = Arc::new(MemoryMetadataRepository::new());
        let orchestrator = BatchOrchestrator::new(
            store.clone(),
            ledger.clone(),
            requests.clone(),
            anchors.clone(),
            metadata.clone(),
            None,
            Arc::new(BatchMetrics::new()),
            config,
        );
        Harness {
            store,
            ledger,
            requests,
            anchors,
            metadata,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), StaticLedger::new())
    }

    async fn seed_stream(h: &Harness, stream: &str, tip: &str, offset_secs: i64) -> Request {
        h.metadata
            .insert(StreamMetadata {
                stream_id: stream.to_string(),
                genesis_cid: Cid::of(format!("genesis-{stream}").as_bytes()).to_string(),
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            })
            .await;

        // The tip block must exist so witnesses can resolve it.
        let tip_cid = h.store.put(tip.as_bytes()).await.unwrap();

        let request = Request {
            id: Uuid::now_v7(),
            stream_id: stream.to_string(),
            cid: tip_cid.to_string(),
            status: RequestStatus::Ready,
            message: None,
            pinned: false,
            created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            updated_at: Utc::now(),
        };
        h.requests.insert(request.clone()).await;
        request
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let h = harness();
        let outcome = h.orchestrator.run_batch().await.unwrap();

        assert_eq!(outcome.claimed, 0);
        assert_eq!(h.ledger.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_leaf_batch_anchors_and_verifies() {
        let h = harness();
        let request = seed_stream(&h, "kjz..A", "bafyA", 0).await;

        let outcome = h.orchestrator.run_batch().await.unwrap();
        assert_eq!(outcome.claimed, 1);
        assert_eq!(outcome.anchored_streams, 1);
        assert_eq!(outcome.completed_requests, 1);

        // Single leaf: the root is the tip and the path is empty.
        let tip: Cid = request.cid.parse().unwrap();
        assert_eq!(outcome.root, Some(tip));

        let anchors = h.anchors.all().await;
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].path, "");
        assert_eq!(anchors[0].request_id, request.id);

        let stored = h.requests.get(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert!(stored.pinned);

        let commit_cid: Cid = anchors[0].cid.parse().unwrap();
        let archive = build_witness(h.store.as_ref(), &commit_cid).await.unwrap();
        assert_eq!(verify_witness(&archive).unwrap(), commit_cid);
    }

    #[tokio::test]
    async fn test_full_batch_depth_two_caps_at_four() {
        let h = harness();
        let mut requests = Vec::new();
        for i in 0..5 {
            requests.push(seed_stream(&h, &format!("s{i}"), &format!("tip-{i}"), i).await);
        }

        let outcome = h.orchestrator.run_batch().await.unwrap();
        assert_eq!(outcome.claimed, 5);
        assert_eq!(outcome.anchored_streams, 4);
        assert_eq!(outcome.unprocessed_requests, 1);

        let anchors = h.anchors.all().await;
        let mut paths: Vec<(Uuid, String)> =
            anchors.iter().map(|a| (a.request_id, a.path.clone())).collect();
        paths.sort_by_key(|(id, _)| {
            requests
                .iter()
                .position(|r| r.id == *id)
                .expect("anchor belongs to a seeded request")
        });
        let ordered: Vec<&str> = paths.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(ordered, vec!["0/0", "0/1", "1/0", "1/1"]);

        // The excess candidate went back to the queue.
        let tail = h.requests.get(requests[4].id).await.unwrap();
        assert_eq!(tail.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_already_anchored_completes_without_publishing() {
        let h = harness();
        let request = seed_stream(&h, "s1", "tip", 0).await;
        h.anchors
            .insert(AnchorRecord {
                id: Uuid::now_v7(),
                request_id: request.id,
                proof_cid: Cid::of(b"old-proof").to_string(),
                path: "0".into(),
                cid: Cid::of(b"old-commit").to_string(),
                created_at: Utc::now(),
            })
            .await;

        let outcome = h.orchestrator.run_batch().await.unwrap();
        assert_eq!(outcome.already_anchored_requests, 1);
        assert_eq!(outcome.anchored_streams, 0);
        assert_eq!(h.ledger.calls(), 0);
        assert_eq!(h.anchors.all().await.len(), 1);

        let stored = h.requests.get(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Completed);
        assert!(stored.pinned);
        assert_eq!(stored.message.as_deref(), Some(MSG_ALREADY_ANCHORED));
    }

    #[tokio::test]
    async fn test_publish_failure_is_local_to_the_candidate() {
        let store = Arc::new(FlakyPublishStore {
            inner: MemoryBlockStore::new(),
            failing_stream: "s-bad".into(),
        });
        let ledger = Arc::new(StaticLedger::new());
        let requests = Arc::new(MemoryRequestRepository::new());
        let anchors = Arc::new(MemoryAnchorRepository::new(requests.clone()));
        let metadata = Arc::new(MemoryMetadataRepository::new());
        let orchestrator = BatchOrchestrator::new(
            store.clone(),
            ledger,
            requests.clone(),
            anchors.clone(),
            metadata.clone(),
            None,
            Arc::new(BatchMetrics::new()),
            test_config(),
        );

        let mut seeded = Vec::new();
        for (i, stream) in ["s-bad", "s-ok-1", "s-ok-2"].iter().enumerate() {
            metadata
                .insert(StreamMetadata {
                    stream_id: stream.to_string(),
                    genesis_cid: Cid::of(format!("genesis-{stream}").as_bytes()).to_string(),
                    metadata: serde_json::json!({}),
                    created_at: Utc::now(),
                })
                .await;
            let tip_cid = store.put(format!("tip-{stream}").as_bytes()).await.unwrap();
            let request = Request {
                id: Uuid::now_v7(),
                stream_id: stream.to_string(),
                cid: tip_cid.to_string(),
                status: RequestStatus::Ready,
                message: None,
                pinned: false,
                created_at: Utc::now() + chrono::Duration::seconds(i as i64),
                updated_at: Utc::now(),
            };
            requests.insert(request.clone()).await;
            seeded.push(request);
        }

        let outcome = orchestrator.run_batch().await.unwrap();
        assert_eq!(outcome.anchored_streams, 2);
        assert_eq!(outcome.failed_requests, 1);
        assert_eq!(outcome.completed_requests, 2);
        assert_eq!(anchors.all().await.len(), 2);

        let bad = requests.get(seeded[0].id).await.unwrap();
        assert_eq!(bad.status, RequestStatus::Failed);
        assert_eq!(bad.message.as_deref(), Some(MSG_COMMIT_PUBLISH_FAILED));

        for request in &seeded[1..] {
            let stored = requests.get(request.id).await.unwrap();
            assert_eq!(stored.status, RequestStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_reverts_then_retry_succeeds() {
        let h = harness_with(test_config(), StaticLedger::failing_once());
        let a = seed_stream(&h, "s1", "tip-1", 0).await;
        let b = seed_stream(&h, "s2", "tip-2", 1).await;

        let err = h.orchestrator.run_batch().await.unwrap_err();
        assert!(matches!(err, CasError::Ledger(_)));
        assert!(h.anchors.all().await.is_empty());
        for request in [&a, &b] {
            let stored = h.requests.get(request.id).await.unwrap();
            assert_eq!(stored.status, RequestStatus::Pending);
        }

        // The queue promotes them again and the next batch succeeds.
        h.requests.find_and_mark_ready(8, 1).await.unwrap();
        let outcome = h.orchestrator.run_batch().await.unwrap();
        assert_eq!(outcome.completed_requests, 2);
        for request in [&a, &b] {
            let stored = h.requests.get(request.id).await.unwrap();
            assert_eq!(stored.status, RequestStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_requests_for_reconciliation() {
        let h = harness();
        let request = seed_stream(&h, "s1", "tip", 0).await;
        h.anchors.fail_next_persist();

        let err = h.orchestrator.run_batch().await.unwrap_err();
        assert!(matches!(err, CasError::Persist(_)));

        // Published blocks stay put; the request is not silently retried.
        let stored = h.requests.get(request.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Processing);
        assert!(h.anchors.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_mutex_serializes_submissions() {
        let config = CasConfig {
            merkle_depth_limit: 2,
            min_stream_count: 1,
            max_stream_limit: 2,
            ..CasConfig::default()
        };
        let h = harness_with(config, StaticLedger::new());
        for i in 0..4 {
            seed_stream(&h, &format!("s{i}"), &format!("tip-{i}"), i).await;
        }

        let (first, second) = tokio::join!(h.orchestrator.run_batch(), h.orchestrator.run_batch());
        first.unwrap();
        second.unwrap();

        assert_eq!(h.ledger.calls(), 2);
        assert_eq!(h.ledger.max_in_flight.load(Ordering::SeqCst), 1);
    }
}
