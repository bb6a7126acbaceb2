//! # lattice-si
//!
//! Snapshot isolation over versioned cells for LatticeDB.
//!
//! This crate implements the data-plane half of the transaction layer:
//! - Versioned cell model with commit-timestamp roll-forwards
//! - Per-scan visibility filters, unpacked and packed
//! - Write-write conflict detection with per-row statuses
//! - Asynchronous read resolution (roll-forward of known outcomes)
//! - DDL visibility filtering and compaction-time version pruning
//!
//! ```text
//!                    +--------------------+
//!   writes --------> | Transactor         | --- conflict check ---+
//!                    +--------------------+                       |
//!                              |                                  v
//!                              v                        +------------------+
//!                    +--------------------+             | TxnSupplier      |
//!                    | Partition (cells)  |             | (lattice-txn)    |
//!                    +--------------------+             +------------------+
//!                              |                                  ^
//!                              v                                  |
//!   reads ---------> | TxnFilter          | --- resolve state ----+
//!                    +--------------------+
//!                              |
//!                              v  settled outcomes
//!                    +--------------------+
//!                    | ReadResolver       | --> commit-ts cells
//!                    +--------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Compaction-time pruning of settled versions
pub mod compaction;

/// Versioned cells, mutations, and packed-row encoding
pub mod data;

/// DDL visibility filtering
pub mod ddl;

/// Per-scan visibility filters
pub mod filter;

/// Versioned cell storage
pub mod partition;

/// Region-level transactional boundary
pub mod region;

/// Asynchronous roll-forward of settled outcomes
pub mod resolver;

/// Conflict detection and mutation application
pub mod transactor;

pub use compaction::CompactionState;
pub use data::{
    decode_packed_entry, encode_packed_entry, CellKind, DataCell, KvMutation, MutationKind,
    TxnResolution, PACKED_COLUMN,
};
pub use ddl::{DdlFilter, DdlFilterConfig};
pub use filter::{PackedTxnFilter, ReturnCode, RowState, SimpleTxnFilter, TxnFilter};
pub use partition::{CellKey, MemPartition, Partition};
pub use region::TransactionalRegion;
pub use resolver::{
    AsyncReadResolver, DirectReadResolver, NoopReadResolver, ReadResolver, ResolverConfig,
    ResolverStats,
};
pub use transactor::{ConflictDetail, ConstraintChecker, MutationStatus, NoConstraint, Transactor};
