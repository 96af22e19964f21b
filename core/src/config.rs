//! Configuration surfaces (SPEC_FULL.md §10.3), validated at construction —
//! mirroring the teacher crate's `ClientConfig`/`ChannelConfig` pattern,
//! where an invalid configuration is rejected synchronously rather than
//! surfacing later as a deferred error.

use std::time::Duration;

use crate::error::Error;

/// §6 "Configuration surface of the bulk-write engine": either a boolean
/// (`true` = defaults, `false` = disabled) or an explicit ops/sec range.
#[derive(Clone, Copy, Debug)]
pub enum Throttling {
    Defaults,
    Disabled,
    Custom {
        initial_ops_per_second: u32,
        max_ops_per_second: u32,
    },
}

impl Default for Throttling {
    fn default() -> Self {
        Throttling::Defaults
    }
}

impl Throttling {
    /// §6 validation: rejects non-integer (unrepresentable here since the
    /// field is already `u32`), non-positive, or inverted values.
    fn validate(self) -> Result<Self, Error> {
        if let Throttling::Custom {
            initial_ops_per_second,
            max_ops_per_second,
        } = self
        {
            if initial_ops_per_second == 0 {
                return Err(Error::invalid_argument(
                    "initialOpsPerSecond must be >= 1",
                ));
            }
            if max_ops_per_second == 0 {
                return Err(Error::invalid_argument("maxOpsPerSecond must be >= 1"));
            }
            if max_ops_per_second < initial_ops_per_second {
                return Err(Error::invalid_argument(
                    "maxOpsPerSecond must be >= initialOpsPerSecond",
                ));
            }
        }
        Ok(self)
    }
}

/// Configuration for the bulk-write engine (§4.6, component F).
#[derive(Clone, Copy, Debug)]
pub struct BulkWriterConfig {
    /// B_max, default 20, hard limit 500 (§4.6.2).
    pub max_batch_size: usize,
    /// P_max, default 500 (§4.6.2).
    pub max_pending_ops: usize,
    /// Retry-batch cap, default 10 (§4.6.4).
    pub max_retry_batch_size: usize,
    /// Per-operation retry cap (§4.6.3 step 5).
    pub max_retry_attempts: u32,
    pub throttling: Throttling,
}

impl Default for BulkWriterConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            max_pending_ops: 500,
            max_retry_batch_size: 10,
            max_retry_attempts: 10,
            throttling: Throttling::Defaults,
        }
    }
}

impl BulkWriterConfig {
    pub fn validate(mut self) -> Result<Self, Error> {
        if self.max_batch_size == 0 || self.max_batch_size > 500 {
            return Err(Error::invalid_argument(
                "max_batch_size must be in 1..=500",
            ));
        }
        if self.max_retry_batch_size == 0 || self.max_retry_batch_size > self.max_batch_size {
            return Err(Error::invalid_argument(
                "max_retry_batch_size must be >= 1 and <= max_batch_size",
            ));
        }
        if self.max_pending_ops == 0 {
            return Err(Error::invalid_argument("max_pending_ops must be >= 1"));
        }
        self.throttling = self.throttling.validate()?;
        Ok(self)
    }
}

/// Configuration for the transaction runner (§4.5, component E).
#[derive(Clone, Copy, Debug)]
pub struct TransactionConfig {
    /// M, default 5.
    pub max_attempts: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl TransactionConfig {
    pub fn validate(self) -> Result<Self, Error> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_argument("max_attempts must be >= 1"));
        }
        Ok(self)
    }
}

/// Configuration for the streaming query executor (§4.4, component D).
#[derive(Clone, Copy, Debug)]
pub struct StreamConfig {
    /// Total wall-clock budget across retries before giving up (§4.4 step 3).
    pub total_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_secs(300),
        }
    }
}

impl StreamConfig {
    pub fn validate(self) -> Result<Self, Error> {
        if self.total_timeout.is_zero() {
            return Err(Error::invalid_argument("total_timeout must be > 0"));
        }
        Ok(self)
    }
}
