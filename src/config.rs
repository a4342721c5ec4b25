//! Configuration for the dispatch engine
//!
//! Process-wide behaviour is modelled as explicit values owned by the built
//! router rather than true globals: [`CoreConfig`] governs the execution
//! pipeline, [`BatchConfig`] governs batch fan-out.
//!
//! # Example
//! ```rust,ignore
//! use nexus_rpc::{BatchConfig, CoreConfig};
//! use std::time::Duration;
//!
//! let core = CoreConfig::new().with_include_exception_details(cfg!(debug_assertions));
//! let batch = BatchConfig::new()
//!     .with_max_batch_size(25)
//!     .with_timeout(Duration::from_secs(10));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// max_batch_size must be greater than 0
    InvalidMaxBatchSize,
    /// max_concurrency must be greater than 0
    InvalidMaxConcurrency,
    /// timeout must be greater than zero
    InvalidTimeout,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaxBatchSize => write!(f, "max_batch_size must be greater than 0"),
            Self::InvalidMaxConcurrency => write!(f, "max_concurrency must be greater than 0"),
            Self::InvalidTimeout => write!(f, "timeout must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Execution-pipeline configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Validate handler outputs against the declared output schema unless a
    /// procedure or call overrides it (default: true)
    pub validate_output: bool,
    /// Attach trapped panic details to INTERNAL_ERROR payloads (default:
    /// false; never enable facing untrusted callers). Response-validation
    /// mismatches are only ever logged, whatever this flag says.
    pub include_exception_details: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            validate_output: true,
            include_exception_details: false,
        }
    }
}

impl CoreConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the process-wide output-validation default.
    #[must_use = "This method returns a new CoreConfig and does not modify self"]
    pub fn with_validate_output(mut self, enabled: bool) -> Self {
        self.validate_output = enabled;
        self
    }

    /// Set whether INTERNAL_ERROR payloads carry exception details.
    #[must_use = "This method returns a new CoreConfig and does not modify self"]
    pub fn with_include_exception_details(mut self, enabled: bool) -> Self {
        self.include_exception_details = enabled;
        self
    }
}

/// Batch fan-out configuration.
///
/// # Fields
///
/// * `max_batch_size` - Largest accepted batch; bigger batches are rejected
///   with a single `BATCH_TOO_LARGE` result. Default: 50.
/// * `max_concurrency` - Cap on in-flight calls during fan-out. Default: 10.
/// * `timeout` - Per-call deadline; a call missing it yields a `TIMEOUT`
///   result in its slot while the rest continue. Default: 30 seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of calls allowed in a single batch (default: 50)
    pub max_batch_size: usize,
    /// Maximum number of in-flight calls during fan-out (default: 10)
    pub max_concurrency: usize,
    /// Per-call deadline (default: 30s)
    pub timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_concurrency: 10,
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl BatchConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum batch size.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the in-flight call cap.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Set the per-call deadline.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_batch_size == 0 {
            return Err(ConfigValidationError::InvalidMaxBatchSize);
        }
        if self.max_concurrency == 0 {
            return Err(ConfigValidationError::InvalidMaxConcurrency);
        }
        if self.timeout.is_zero() {
            return Err(ConfigValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_core_defaults() {
        let config = CoreConfig::default();
        assert!(config.validate_output);
        assert!(!config.include_exception_details);
    }

    #[test]
    fn test_batch_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_validation_rejects_zeroes() {
        assert_eq!(
            BatchConfig::new().with_max_batch_size(0).validate(),
            Err(ConfigValidationError::InvalidMaxBatchSize)
        );
        assert_eq!(
            BatchConfig::new().with_max_concurrency(0).validate(),
            Err(ConfigValidationError::InvalidMaxConcurrency)
        );
        assert_eq!(
            BatchConfig::new().with_timeout(Duration::ZERO).validate(),
            Err(ConfigValidationError::InvalidTimeout)
        );
    }

    proptest! {
        #[test]
        fn prop_positive_batch_configs_validate(
            size in 1usize..10_000,
            concurrency in 1usize..1_000,
            timeout_ms in 1u64..600_000,
        ) {
            let config = BatchConfig::new()
                .with_max_batch_size(size)
                .with_max_concurrency(concurrency)
                .with_timeout(Duration::from_millis(timeout_ms));
            prop_assert!(config.validate().is_ok());
        }
    }
}
