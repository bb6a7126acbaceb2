//! The transaction store: a persistent table of transaction rows.
//!
//! The store is split along two seams:
//! - [`TxnPartition`] is the key-value collaborator the table is kept
//!   in: single-row reads, writes, and an atomic per-cell compare-and-
//!   swap. [`MemTxnPartition`] implements it in memory for tests.
//! - [`TxnSupplier`] / [`TxnStore`] are what the rest of the system
//!   programs against: the read side hands out resolved [`TxnView`]s,
//!   the write side records and transitions them.
//!
//! [`PartitionTxnStore`] is the durable implementation over a partition;
//! [`CachedTxnStore`] layers a read-through view cache on top of any
//! store and is what hot paths are given.

mod cached;
mod codec;
mod partition;
mod partition_store;

pub use cached::CachedTxnStore;
pub use partition::{MemTxnPartition, TxnPartition, TxnRow};
pub use partition_store::PartitionTxnStore;

pub(crate) use partition_store::now_millis;

use std::sync::Arc;

use lattice_common::{LatticeResult, TableId, TxnId, TxnState};

use crate::txn::{TxnRecord, TxnView};

/// Read side of the transaction store.
///
/// Every lookup returns a view with its ancestor chain already
/// resolved, so callers never walk parents through the store.
pub trait TxnSupplier: Send + Sync {
    /// Returns the resolved view of a transaction.
    ///
    /// Fails with `TransactionNotFound` when no record exists.
    fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>>;

    /// Returns the view only if it is served without a store round
    /// trip. `None` says nothing about existence.
    fn transaction_if_cached(&self, id: TxnId) -> Option<Arc<TxnView>>;

    /// Drops any cached view of `id`, forcing the next lookup through
    /// to the store.
    fn invalidate(&self, id: TxnId);
}

/// Write side of the transaction store.
pub trait TxnStore: TxnSupplier {
    /// Persists a fresh ACTIVE record.
    fn record_transaction(&self, record: &TxnRecord) -> LatticeResult<()>;

    /// Atomically transitions `id` from `expected` to `new`, recording
    /// `commit_ts` when committing. Returns false when the persisted
    /// state no longer matches `expected`; the caller must re-read and
    /// decide.
    fn compare_and_set_state(
        &self,
        id: TxnId,
        expected: TxnState,
        new: TxnState,
        commit_ts: Option<TxnId>,
    ) -> LatticeResult<bool>;

    /// Adds `table` to the transaction's write set. Idempotent.
    fn elevate(&self, id: TxnId, table: TableId) -> LatticeResult<()>;

    /// Refreshes the transaction's liveness heartbeat. Returns false
    /// once the transaction is terminal or its heartbeat has lapsed.
    fn keep_alive(&self, id: TxnId) -> LatticeResult<bool>;

    /// Ids of every writable transaction whose effective state is
    /// ACTIVE and whose begin timestamp is at most `as_of.id()`,
    /// restricted to writers of `table` when given, in ascending order.
    fn active_transaction_ids(
        &self,
        as_of: &TxnView,
        table: Option<TableId>,
    ) -> LatticeResult<Vec<TxnId>>;
}

impl<T: TxnSupplier + ?Sized> TxnSupplier for Arc<T> {
    fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
        (**self).transaction(id)
    }

    fn transaction_if_cached(&self, id: TxnId) -> Option<Arc<TxnView>> {
        (**self).transaction_if_cached(id)
    }

    fn invalidate(&self, id: TxnId) {
        (**self).invalidate(id);
    }
}

impl<T: TxnStore + ?Sized> TxnStore for Arc<T> {
    fn record_transaction(&self, record: &TxnRecord) -> LatticeResult<()> {
        (**self).record_transaction(record)
    }

    fn compare_and_set_state(
        &self,
        id: TxnId,
        expected: TxnState,
        new: TxnState,
        commit_ts: Option<TxnId>,
    ) -> LatticeResult<bool> {
        (**self).compare_and_set_state(id, expected, new, commit_ts)
    }

    fn elevate(&self, id: TxnId, table: TableId) -> LatticeResult<()> {
        (**self).elevate(id, table)
    }

    fn keep_alive(&self, id: TxnId) -> LatticeResult<bool> {
        (**self).keep_alive(id)
    }

    fn active_transaction_ids(
        &self,
        as_of: &TxnView,
        table: Option<TableId>,
    ) -> LatticeResult<Vec<TxnId>> {
        (**self).active_transaction_ids(as_of, table)
    }
}
