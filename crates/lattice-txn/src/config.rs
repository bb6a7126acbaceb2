//! Configuration for the transaction layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use lattice_common::{
    LatticeError, LatticeResult, DEFAULT_ACTIVE_TXN_CACHE_TTL_MS, DEFAULT_KEEP_ALIVE_WINDOW_MS,
    DEFAULT_TIMESTAMP_BLOCK_SIZE, DEFAULT_TXN_CACHE_CAPACITY, MIN_TIMESTAMP_BLOCK_SIZE,
};

use crate::backoff::RetryPolicy;

/// Configuration for the oracle, store, and lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnConfig {
    /// Number of timestamps reserved per durable oracle write.
    pub timestamp_block_size: u64,
    /// Capacity of the transaction view cache.
    pub txn_cache_capacity: usize,
    /// How long a cached view of a still-unsettled transaction may be
    /// served before revalidating against the store.
    pub active_txn_cache_ttl: Duration,
    /// How long a writable transaction may go without a keep-alive
    /// heartbeat before the store treats it as rolled back.
    pub keep_alive_window: Duration,
    /// Retry policy for transient storage errors.
    pub retry: RetryPolicy,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            timestamp_block_size: DEFAULT_TIMESTAMP_BLOCK_SIZE,
            txn_cache_capacity: DEFAULT_TXN_CACHE_CAPACITY,
            active_txn_cache_ttl: Duration::from_millis(DEFAULT_ACTIVE_TXN_CACHE_TTL_MS),
            keep_alive_window: Duration::from_millis(DEFAULT_KEEP_ALIVE_WINDOW_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl TxnConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration suitable for unit tests: small timestamp blocks
    /// so refill paths are exercised, short cache TTLs, fast retries,
    /// and a keep-alive window tests will not trip by accident.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            timestamp_block_size: 16,
            txn_cache_capacity: 256,
            active_txn_cache_ttl: Duration::from_millis(10),
            keep_alive_window: Duration::from_secs(600),
            retry: RetryPolicy::for_testing(),
        }
    }

    /// Sets the timestamp block size.
    #[must_use]
    pub fn with_timestamp_block_size(mut self, block_size: u64) -> Self {
        self.timestamp_block_size = block_size;
        self
    }

    /// Sets the transaction view cache capacity.
    #[must_use]
    pub fn with_txn_cache_capacity(mut self, capacity: usize) -> Self {
        self.txn_cache_capacity = capacity;
        self
    }

    /// Sets the TTL for cached views of unsettled transactions.
    #[must_use]
    pub fn with_active_txn_cache_ttl(mut self, ttl: Duration) -> Self {
        self.active_txn_cache_ttl = ttl;
        self
    }

    /// Sets the keep-alive window.
    #[must_use]
    pub fn with_keep_alive_window(mut self, window: Duration) -> Self {
        self.keep_alive_window = window;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> LatticeResult<()> {
        if self.timestamp_block_size < MIN_TIMESTAMP_BLOCK_SIZE {
            return Err(LatticeError::InvalidConfig {
                message: format!(
                    "timestamp_block_size {} below minimum {}",
                    self.timestamp_block_size, MIN_TIMESTAMP_BLOCK_SIZE
                ),
            });
        }
        if self.txn_cache_capacity == 0 {
            return Err(LatticeError::InvalidConfig {
                message: "txn_cache_capacity must be non-zero".to_string(),
            });
        }
        if self.keep_alive_window.is_zero() {
            return Err(LatticeError::InvalidConfig {
                message: "keep_alive_window must be non-zero".to_string(),
            });
        }
        self.retry.validate()
    }
}
