//! STM configuration
//!
//! Tunables for the commit driver and for data structures that need a
//! default sizing. Every field has a default, so a partial document (for
//! example a `[stm]` table in a larger config file) deserializes cleanly.
//!
//! # Example
//!
//! ```ignore
//! let config = StmConfig::builder()
//!     .yield_after_conflicts(8)
//!     .warn_after_attempts(1_000)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of inline conflict re-runs before yielding to the scheduler
pub const DEFAULT_YIELD_AFTER_CONFLICTS: u32 = 16;

/// Default attempt count after which a transaction is reported as slow
pub const DEFAULT_WARN_AFTER_ATTEMPTS: u64 = 10_000;

/// Default number of buckets of a new TMap
pub const DEFAULT_MAP_INITIAL_CAPACITY: usize = 16;

/// Configuration of the STM engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Consecutive conflicting attempts re-run inline before the commit
    /// driver yields to the scheduler
    pub yield_after_conflicts: u32,

    /// Attempt count after which a transaction is logged as slow
    pub warn_after_attempts: u64,

    /// Number of buckets a new TMap starts with (power of two)
    pub map_initial_capacity: usize,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            yield_after_conflicts: DEFAULT_YIELD_AFTER_CONFLICTS,
            warn_after_attempts: DEFAULT_WARN_AFTER_ATTEMPTS,
            map_initial_capacity: DEFAULT_MAP_INITIAL_CAPACITY,
        }
    }
}

impl StmConfig {
    /// Create a builder starting from the defaults
    pub fn builder() -> StmConfigBuilder {
        StmConfigBuilder::new()
    }

    /// Check that every field is within its valid range
    pub fn validate(&self) -> Result<()> {
        if self.yield_after_conflicts == 0 {
            return Err(Error::InvalidConfig(
                "yield_after_conflicts must be greater than 0".to_string(),
            ));
        }
        if self.warn_after_attempts == 0 {
            return Err(Error::InvalidConfig(
                "warn_after_attempts must be greater than 0".to_string(),
            ));
        }
        if !self.map_initial_capacity.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "map_initial_capacity must be a power of two, got {}",
                self.map_initial_capacity
            )));
        }
        Ok(())
    }
}

/// Builder for [`StmConfig`]
#[derive(Debug, Clone, Default)]
pub struct StmConfigBuilder {
    config: StmConfig,
}

impl StmConfigBuilder {
    /// Create a builder starting from the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of inline conflict re-runs before yielding
    pub fn yield_after_conflicts(mut self, n: u32) -> Self {
        self.config.yield_after_conflicts = n;
        self
    }

    /// Set the attempt count after which a transaction is logged as slow
    pub fn warn_after_attempts(mut self, n: u64) -> Self {
        self.config.warn_after_attempts = n;
        self
    }

    /// Set the initial bucket count of new maps
    pub fn map_initial_capacity(mut self, n: usize) -> Self {
        self.config.map_initial_capacity = n;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<StmConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.yield_after_conflicts, DEFAULT_YIELD_AFTER_CONFLICTS);
        assert_eq!(config.map_initial_capacity, 16);
    }

    #[test]
    fn test_builder_overrides() {
        let config = StmConfig::builder()
            .yield_after_conflicts(4)
            .warn_after_attempts(100)
            .map_initial_capacity(64)
            .build()
            .unwrap();

        assert_eq!(config.yield_after_conflicts, 4);
        assert_eq!(config.warn_after_attempts, 100);
        assert_eq!(config.map_initial_capacity, 64);
    }

    #[test]
    fn test_builder_rejects_zero_yield() {
        let err = StmConfig::builder()
            .yield_after_conflicts(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_builder_rejects_non_power_of_two_capacity() {
        let err = StmConfig::builder()
            .map_initial_capacity(12)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: StmConfig = serde_json::from_str(r#"{"yield_after_conflicts": 2}"#).unwrap();
        assert_eq!(config.yield_after_conflicts, 2);
        assert_eq!(config.warn_after_attempts, DEFAULT_WARN_AFTER_ATTEMPTS);
        assert_eq!(config.map_initial_capacity, DEFAULT_MAP_INITIAL_CAPACITY);
    }
}
