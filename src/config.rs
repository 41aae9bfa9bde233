/// Runtime configuration for the anchor service.
///
/// Batch shape is driven by the Merkle depth limit: a depth of `d` caps a
/// batch at `2^d` streams. A depth of 0 disables the cap. All values can
/// be overridden through `CAS_*` environment variables.
use std::env;

use crate::error::{CasError, Result};

/// Fallback claim limit when the Merkle depth cap is disabled.
const UNCAPPED_STREAM_LIMIT: usize = 1024;

#[derive(Debug, Clone)]
pub struct CasConfig {
    /// Maximum Merkle tree depth. 0 disables the batch cap.
    pub merkle_depth_limit: u32,
    /// Minimum READY requests required before a batch runs.
    pub min_stream_count: usize,
    /// Maximum requests claimed per batch.
    pub max_stream_limit: usize,
    /// Anchor through the on-chain contract instead of raw calldata.
    pub use_smart_contract_anchors: bool,
    /// Consult the stream network for tip selection instead of taking the
    /// newest request as-is.
    pub load_stream_candidates: bool,
    /// Age after which a READY request is considered expired and re-emitted.
    pub ready_retry_interval_secs: u64,
    /// Age after which terminal pinned requests become garbage-collectable.
    pub gc_retention_secs: u64,
}

impl Default for CasConfig {
    fn default() -> Self {
        let merkle_depth_limit = 10;
        Self {
            merkle_depth_limit,
            min_stream_count: (1usize << merkle_depth_limit) / 2,
            max_stream_limit: 1usize << merkle_depth_limit,
            use_smart_contract_anchors: false,
            load_stream_candidates: false,
            ready_retry_interval_secs: 300,
            gc_retention_secs: 30 * 24 * 3600,
        }
    }
}

impl CasConfig {
    /// Load configuration from `CAS_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let merkle_depth_limit = read_var("CAS_MERKLE_DEPTH_LIMIT")?.unwrap_or(10);

        let default_max = if merkle_depth_limit > 0 {
            1usize << merkle_depth_limit
        } else {
            UNCAPPED_STREAM_LIMIT
        };
        let default_min = if merkle_depth_limit > 0 {
            (1usize << merkle_depth_limit) / 2
        } else {
            1
        };

        Ok(Self {
            merkle_depth_limit,
            min_stream_count: read_var("CAS_MIN_STREAM_COUNT")?.unwrap_or(default_min),
            max_stream_limit: read_var("CAS_MAX_STREAM_LIMIT")?.unwrap_or(default_max),
            use_smart_contract_anchors: read_flag("CAS_USE_SMART_CONTRACT_ANCHORS")?,
            load_stream_candidates: read_flag("CAS_LOAD_STREAM_CANDIDATES")?,
            ready_retry_interval_secs: read_var("CAS_READY_RETRY_INTERVAL_SECS")?.unwrap_or(300),
            gc_retention_secs: read_var("CAS_GC_RETENTION_SECS")?.unwrap_or(30 * 24 * 3600),
        })
    }

    /// Batch cap implied by the depth limit, if any.
    pub fn stream_count_limit(&self) -> Option<usize> {
        if self.merkle_depth_limit > 0 {
            Some(1usize << self.merkle_depth_limit)
        } else {
            None
        }
    }
}

fn read_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| CasError::Config(format!("{name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

fn read_flag(name: &str) -> Result<bool> {
    Ok(read_var::<String>(name)?
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_follow_depth() {
        let config = CasConfig::default();
        assert_eq!(config.max_stream_limit, 1024);
        assert_eq!(config.min_stream_count, 512);
        assert_eq!(config.stream_count_limit(), Some(1024));
    }

    #[test]
    fn test_zero_depth_disables_cap() {
        let config = CasConfig {
            merkle_depth_limit: 0,
            ..CasConfig::default()
        };
        assert_eq!(config.stream_count_limit(), None);
    }
}
