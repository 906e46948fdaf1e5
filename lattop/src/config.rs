//! Engine sizing
//!
//! All containers are fixed-size: bucket counts and capacities are chosen
//! once at start-up and never grow, so no hook invocation ever waits on a
//! resize.

use crate::domain::ConfigError;

/// Default bucket count for both hash tables (2^14).
pub const DEFAULT_BUCKETS: usize = 1 << 14;

/// Default number of entries rendered per report.
pub const DEFAULT_REPORT_LIMIT: usize = 1000;

/// Largest capacity any container accepts; slots are addressed by `u32`.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Buckets in the pending-wait table
    pub pending_buckets: usize,
    /// Buckets in the latency index
    pub index_buckets: usize,
    /// Concurrently sleeping threads tracked
    pub max_pending: usize,
    /// Distinct (thread, call path) records kept
    pub max_records: usize,
    /// Ranking-tree entries
    pub max_rank_entries: usize,
    /// Upper bound on entries in one report
    pub report_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_buckets: DEFAULT_BUCKETS,
            index_buckets: DEFAULT_BUCKETS,
            max_pending: 4096,
            max_records: 65_536,
            max_rank_entries: 65_536,
            report_limit: DEFAULT_REPORT_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Reject sizes that would leave a container unusable.
    ///
    /// # Errors
    /// - `ConfigError::Zero` naming the first zero-valued field.
    /// - `ConfigError::TooLarge` naming the first capacity past [`MAX_CAPACITY`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("pending_buckets", self.pending_buckets),
            ("index_buckets", self.index_buckets),
            ("max_pending", self.max_pending),
            ("max_records", self.max_records),
            ("max_rank_entries", self.max_rank_entries),
            ("report_limit", self.report_limit),
        ];
        if let Some(&(name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }

        let capacities = [
            ("max_pending", self.max_pending),
            ("max_records", self.max_records),
            ("max_rank_entries", self.max_rank_entries),
        ];
        match capacities.iter().find(|(_, value)| *value > MAX_CAPACITY) {
            Some(&(name, _)) => Err(ConfigError::TooLarge { name, max: MAX_CAPACITY }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_buckets_rejected() {
        let config = EngineConfig { index_buckets: 0, ..EngineConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("index_buckets")));
    }

    #[test]
    fn test_zero_report_limit_rejected() {
        let config = EngineConfig { report_limit: 0, ..EngineConfig::default() };
        assert_eq!(config.validate(), Err(ConfigError::Zero("report_limit")));
    }

    #[test]
    fn test_capacity_at_slot_limit_accepted() {
        let config = EngineConfig { max_records: MAX_CAPACITY, ..EngineConfig::default() };
        assert!(config.validate().is_ok());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_capacity_past_slot_limit_rejected() {
        let config = EngineConfig { max_records: MAX_CAPACITY + 1, ..EngineConfig::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooLarge { name: "max_records", max: MAX_CAPACITY })
        );

        let config = EngineConfig { max_rank_entries: usize::MAX, ..EngineConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLarge { name: "max_rank_entries", .. })
        ));
    }
}
