//! Caching utilities for LatticeDB's transaction layer.
//!
//! The transaction layer leans on two caches with the same shape: the
//! transaction-view cache in front of the durable transaction store, and
//! the per-filter DDL visibility cache. Both need a bounded entry count
//! *and* per-entry expiry, so this crate provides a single LRU with
//! first-class TTL support:
//!
//! - **`TtlLruCache`**: single-threaded LRU with optional per-entry TTL
//! - **`SyncTtlCache`**: mutex-wrapped handle for shared use
//! - **`CacheStats`**: lock-free counters for monitoring
//!
//! Expiry is lazy: entries past their deadline are dropped when touched,
//! not by a background sweeper.
//!
//! # Example
//!
//! ```rust
//! use lattice_cache::TtlLruCache;
//! use std::time::Duration;
//!
//! let mut cache = TtlLruCache::new(100);
//! cache.insert("pinned", 1, None);
//! cache.insert("short-lived", 2, Some(Duration::from_secs(60)));
//! assert_eq!(cache.get(&"pinned"), Some(1));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lru;
pub mod stats;

pub use lru::{SyncTtlCache, TtlLruCache};
pub use stats::CacheStats;

/// Default capacity for caches when not specified.
pub const DEFAULT_CAPACITY: usize = 1024;
