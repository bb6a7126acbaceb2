//! System-wide constants for LatticeDB's transaction layer.
//!
//! This module defines default tuning values used across the transaction
//! components. Individual components expose configuration structs that
//! start from these values.

// =============================================================================
// Timestamp Source Constants
// =============================================================================

/// Default number of timestamps reserved per durable block allocation.
///
/// The timestamp source persists a new high-water mark once per block, so a
/// larger block trades a wider restart gap for fewer durable writes on the
/// allocation hot path.
pub const DEFAULT_TIMESTAMP_BLOCK_SIZE: u64 = 8192;

/// Minimum allowed timestamp block size.
pub const MIN_TIMESTAMP_BLOCK_SIZE: u64 = 2;

// =============================================================================
// Transaction Store Constants
// =============================================================================

/// Default capacity of the transaction view cache (entries).
pub const DEFAULT_TXN_CACHE_CAPACITY: usize = 1 << 16;

/// Default revalidation window for cached ACTIVE transaction views.
///
/// Terminal transactions never change and are cached without expiry;
/// ACTIVE ones are re-fetched after this many milliseconds.
pub const DEFAULT_ACTIVE_TXN_CACHE_TTL_MS: u64 = 1_000;

/// Window after the last keep-alive in which an ACTIVE transaction is still
/// considered live. Readers treat an ACTIVE transaction past this window as
/// rolled back. Zero disables the check.
pub const DEFAULT_KEEP_ALIVE_WINDOW_MS: u64 = 150_000;

// =============================================================================
// Retry Constants
// =============================================================================

/// Default number of attempts against an unavailable backing store.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 10;

/// Default cap on a single backoff delay, in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 1_000;

// =============================================================================
// Write Admission Constants
// =============================================================================

/// Default maximum number of threads concurrently running dependent writes.
pub const DEFAULT_MAX_DEPENDENT_WRITE_THREADS: u32 = 40;

/// Default maximum number of threads concurrently running independent writes.
pub const DEFAULT_MAX_INDEPENDENT_WRITE_THREADS: u32 = 20;

/// Default maximum number of in-flight dependent row writes.
pub const DEFAULT_MAX_DEPENDENT_WRITE_COUNT: u32 = 60_000;

/// Default maximum number of in-flight independent row writes.
pub const DEFAULT_MAX_INDEPENDENT_WRITE_COUNT: u32 = 40_000;

// =============================================================================
// Read Resolution Constants
// =============================================================================

/// Default depth of the asynchronous read-resolution queue.
pub const DEFAULT_RESOLVER_QUEUE_DEPTH: usize = 4096;

/// Default maximum number of resolutions drained per worker iteration.
pub const DEFAULT_RESOLVER_DRAIN_BATCH: usize = 128;

// =============================================================================
// DDL Visibility Constants
// =============================================================================

/// Default capacity of a DDL filter's per-transaction visibility cache.
pub const DEFAULT_DDL_CACHE_CAPACITY: usize = 10_000;

/// Default TTL for DDL visibility cache entries, in seconds.
pub const DEFAULT_DDL_CACHE_TTL_SECS: u64 = 60;

// =============================================================================
// Commit Timestamp Encoding
// =============================================================================

/// Sentinel stored in a commit-timestamp cell for a rolled-back writer.
///
/// Real commit timestamps are drawn from the same sequence as transaction
/// ids and never reach this value.
pub const ROLLED_BACK_MARKER: u64 = u64::MAX;
