//! Transaction management for LatticeDB.
//!
//! This crate provides the transactional core of the system:
//! - Transaction records and resolved views of transaction chains
//! - A block-allocating timestamp oracle backed by a persisted limit
//! - The transaction store: a persistent table of transaction rows with
//!   a read-through cache in front of it
//! - The lifecycle manager that begins, commits, rolls back, elevates,
//!   and chains transactions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        TxnLifecycleManager          │
//! │   begin / commit / rollback / ...   │
//! └──────────┬───────────────┬──────────┘
//!            │               │
//!            ▼               ▼
//! ┌──────────────────┐  ┌──────────────────────┐
//! │ BlockTimestamp   │  │ CachedTxnStore       │
//! │ Oracle           │  │  └─ PartitionTxnStore│
//! │  └─ Sequence     │  │      └─ TxnPartition │
//! │     Persistor    │  │                      │
//! └──────────────────┘  └──────────────────────┘
//! ```
//!
//! Transaction ids double as begin timestamps, and commit timestamps are
//! drawn from the same sequence, so the relative order of any two events
//! in the system can be read off the ids alone.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
pub mod lifecycle;
pub mod oracle;
pub mod store;
pub mod txn;

pub use backoff::RetryPolicy;
pub use config::TxnConfig;
pub use lifecycle::{LifecycleStats, TxnLifecycleManager};
pub use oracle::{BlockTimestampOracle, MemSequencePersistor, SequencePersistor, TimestampSource};
pub use store::{
    CachedTxnStore, MemTxnPartition, PartitionTxnStore, TxnPartition, TxnStore, TxnSupplier,
};
pub use txn::{TxnRecord, TxnView};
