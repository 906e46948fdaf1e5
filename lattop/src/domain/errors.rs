//! Structured error types for lattop
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{AllocSite, Tid};
use thiserror::Error;

/// A non-blocking allocation was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Out of memory allocating {site}")]
pub struct AllocError {
    pub site: AllocSite,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must be at most {max}")]
    TooLarge { name: &'static str, max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The sample was dropped; nothing stored was touched.
    #[error("Dropped sample: out of memory allocating {0}")]
    OutOfMemory(AllocSite),

    /// A ranked record had no reachable rank entry; the update was skipped.
    #[error("Rank entry missing for ranked record of {tid} (cycles = {total})")]
    RankEntryMissing { tid: Tid, total: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl From<AllocError> for EngineError {
    fn from(err: AllocError) -> Self {
        EngineError::OutOfMemory(err.site)
    }
}

/// A broken link between the latency index and the ranking tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Ranked record of {tid} has {count} rank entries, expected 1")]
    RankedEntryCount { tid: Tid, count: usize },

    #[error("Rank entry of {tid} is keyed {entry}, record total is {total}")]
    StaleRankValue { tid: Tid, entry: u64, total: u64 },

    #[error("Unranked record of {tid} still has {count} rank entries")]
    UnrankedHasEntry { tid: Tid, count: usize },

    #[error("{count} rank entries reference no record")]
    DanglingEntry { count: usize },
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to parse trace line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Truncated hook record: got {got} of {expected} bytes")]
    TruncatedRecord { got: usize, expected: usize },

    #[error("Unknown hook kind {kind} for {tid}")]
    UnknownHookKind { kind: u32, tid: Tid },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_error_converts_to_out_of_memory() {
        let err: EngineError = AllocError { site: AllocSite::Record }.into();
        assert_eq!(err, EngineError::OutOfMemory(AllocSite::Record));
        assert_eq!(err.to_string(), "Dropped sample: out of memory allocating latency record");
    }

    #[test]
    fn test_rank_entry_missing_display() {
        let err = EngineError::RankEntryMissing { tid: Tid(7), total: 50 };
        assert!(err.to_string().contains("TID:7"));
        assert!(err.to_string().contains("cycles = 50"));
    }

    #[test]
    fn test_config_error_display() {
        let err = EngineError::from(ConfigError::Zero("index_buckets"));
        assert_eq!(err.to_string(), "Invalid configuration: index_buckets must be greater than zero");
    }

    #[test]
    fn test_too_large_display() {
        let err = ConfigError::TooLarge { name: "max_records", max: 7 };
        assert_eq!(err.to_string(), "max_records must be at most 7");
    }
}
