/// Batch metric counters mirroring the orchestrator's failure taxonomy.
///
/// Counters are plain atomics so the orchestrator can record outcomes
/// without holding locks. Emission is a capability: the orchestrator is
/// handed a `BatchMetrics`, never a process-wide singleton.
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BatchMetrics {
    pub batches_run: AtomicU64,
    pub batches_empty: AtomicU64,
    pub requests_claimed: AtomicU64,
    pub requests_completed: AtomicU64,
    pub requests_failed: AtomicU64,
    pub requests_reverted: AtomicU64,
    pub candidates_accepted: AtomicU64,
    pub candidates_already_anchored: AtomicU64,
    pub candidates_unprocessed: AtomicU64,
    pub merkle_build_failures: AtomicU64,
    pub ledger_failures: AtomicU64,
    pub proof_publish_failures: AtomicU64,
    pub anchor_publish_failures: AtomicU64,
    pub persist_failures: AtomicU64,
    pub events_emitted: AtomicU64,
    pub events_failed: AtomicU64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn incr(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_run: self.batches_run.load(Ordering::Relaxed),
            batches_empty: self.batches_empty.load(Ordering::Relaxed),
            requests_claimed: self.requests_claimed.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_reverted: self.requests_reverted.load(Ordering::Relaxed),
            candidates_accepted: self.candidates_accepted.load(Ordering::Relaxed),
            candidates_already_anchored: self.candidates_already_anchored.load(Ordering::Relaxed),
            candidates_unprocessed: self.candidates_unprocessed.load(Ordering::Relaxed),
            merkle_build_failures: self.merkle_build_failures.load(Ordering::Relaxed),
            ledger_failures: self.ledger_failures.load(Ordering::Relaxed),
            proof_publish_failures: self.proof_publish_failures.load(Ordering::Relaxed),
            anchor_publish_failures: self.anchor_publish_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time metric values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_run: u64,
    pub batches_empty: u64,
    pub requests_claimed: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_reverted: u64,
    pub candidates_accepted: u64,
    pub candidates_already_anchored: u64,
    pub candidates_unprocessed: u64,
    pub merkle_build_failures: u64,
    pub ledger_failures: u64,
    pub proof_publish_failures: u64,
    pub anchor_publish_failures: u64,
    pub persist_failures: u64,
    pub events_emitted: u64,
    pub events_failed: u64,
}
