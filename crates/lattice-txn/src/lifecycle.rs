//! Transaction lifecycle: begin, elevate, commit, rollback, chain.
//!
//! The lifecycle manager is the only component that allocates ids and
//! transitions transaction state; everything else observes transactions
//! through the store. Two decisions shape it:
//!
//! - Read-only transactions are never persisted. They consume one id at
//!   begin for their snapshot, commit without touching the oracle or
//!   the store, and become durable only if elevated before their first
//!   write.
//! - Terminal transitions are compare-and-swap races. A caller that
//!   loses re-reads the persisted outcome: a commit that finds the
//!   transaction already committed returns that commit timestamp, while
//!   contradictory outcomes surface `ConcurrentStateChange` or
//!   `AlreadyCommitted`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use lattice_common::{IsolationLevel, LatticeError, LatticeResult, TableId, TxnId, TxnState};

use crate::oracle::TimestampSource;
use crate::store::{now_millis, TxnStore};
use crate::txn::{TxnRecord, TxnView};

/// Counters for lifecycle operations.
#[derive(Debug, Default)]
pub struct LifecycleStats {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    elevated: AtomicU64,
    chained: AtomicU64,
}

impl LifecycleStats {
    fn record_begun(&self) {
        self.begun.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_committed(&self) {
        self.committed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_rolled_back(&self) {
        self.rolled_back.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_elevated(&self) {
        self.elevated.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn record_chained(&self) {
        self.chained.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Transactions begun.
    #[must_use]
    pub fn begun(&self) -> u64 {
        self.begun.load(AtomicOrdering::Relaxed)
    }

    /// Transactions committed.
    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed.load(AtomicOrdering::Relaxed)
    }

    /// Transactions rolled back.
    #[must_use]
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(AtomicOrdering::Relaxed)
    }

    /// Elevations performed.
    #[must_use]
    pub fn elevated(&self) -> u64 {
        self.elevated.load(AtomicOrdering::Relaxed)
    }

    /// Transactions chained.
    #[must_use]
    pub fn chained(&self) -> u64 {
        self.chained.load(AtomicOrdering::Relaxed)
    }
}

/// Begins, elevates, commits, rolls back, and chains transactions.
pub struct TxnLifecycleManager {
    oracle: Arc<dyn TimestampSource>,
    store: Arc<dyn TxnStore>,
    stats: LifecycleStats,
}

impl TxnLifecycleManager {
    /// Creates a manager over the given oracle and store.
    pub fn new(oracle: Arc<dyn TimestampSource>, store: Arc<dyn TxnStore>) -> Self {
        Self {
            oracle,
            store,
            stats: LifecycleStats::default(),
        }
    }

    /// Returns the transaction store.
    pub fn store(&self) -> &Arc<dyn TxnStore> {
        &self.store
    }

    /// Returns the timestamp oracle.
    pub fn oracle(&self) -> &Arc<dyn TimestampSource> {
        &self.oracle
    }

    /// Returns operation counters.
    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }

    /// Begins a root transaction at the default isolation level.
    pub fn begin_transaction(&self, table: Option<TableId>) -> LatticeResult<Arc<TxnView>> {
        self.begin_transaction_with_isolation(IsolationLevel::default(), table)
    }

    /// Begins a root transaction.
    pub fn begin_transaction_with_isolation(
        &self,
        isolation: IsolationLevel,
        table: Option<TableId>,
    ) -> LatticeResult<Arc<TxnView>> {
        let id = self.oracle.next_timestamp()?;
        self.create(id, None, isolation, false, table)
    }

    /// Begins a child inheriting the parent's isolation level.
    pub fn begin_child_transaction(
        &self,
        parent: &Arc<TxnView>,
        table: Option<TableId>,
    ) -> LatticeResult<Arc<TxnView>> {
        self.begin_child_with(parent, parent.isolation(), false, table)
    }

    /// Begins a child transaction.
    ///
    /// The parent's effective state is checked best-effort at call
    /// time; a later parent rollback is handled by effective-state
    /// propagation, never rejected retroactively. A writable child
    /// requires a writable parent: the child's persisted record names
    /// the parent, so the parent must be durable first. Elevate the
    /// parent and retry with the refreshed view.
    pub fn begin_child_with(
        &self,
        parent: &Arc<TxnView>,
        isolation: IsolationLevel,
        additive: bool,
        table: Option<TableId>,
    ) -> LatticeResult<Arc<TxnView>> {
        self.check_parent(parent, table)?;
        let id = self.oracle.next_timestamp()?;
        self.create(id, Some(Arc::clone(parent)), isolation, additive, table)
    }

    /// Commits `txn_to_commit` and begins its successor as a child of
    /// `parent`, reusing the freed commit timestamp as the successor's
    /// begin timestamp so the pair costs one oracle allocation.
    ///
    /// A read-only predecessor frees no timestamp; the successor reuses
    /// its id outright.
    pub fn chain_transaction(
        &self,
        parent: Option<&Arc<TxnView>>,
        isolation: IsolationLevel,
        additive: bool,
        table: Option<TableId>,
        txn_to_commit: &Arc<TxnView>,
    ) -> LatticeResult<Arc<TxnView>> {
        if let Some(parent) = parent {
            self.check_parent(parent, table)?;
        }
        let commit_ts = self.commit(txn_to_commit)?;
        let successor_id = if txn_to_commit.is_writable() {
            commit_ts
        } else {
            txn_to_commit.id()
        };
        let view = self.create(successor_id, parent.cloned(), isolation, additive, table)?;
        self.stats.record_chained();
        Ok(view)
    }

    /// Elevates `txn` to write to `table`, returning the refreshed
    /// view. Must be called before the first write to a table the
    /// transaction has not touched.
    ///
    /// Read-only ancestors are elevated along the way, outermost first,
    /// so the persisted chain is complete before the leaf becomes
    /// writable.
    pub fn elevate_transaction(
        &self,
        txn: &Arc<TxnView>,
        table: TableId,
    ) -> LatticeResult<Arc<TxnView>> {
        self.ensure_writable(txn, table)?;
        self.stats.record_elevated();
        self.store.invalidate(txn.id());
        self.store.transaction(txn.id())
    }

    /// Commits a transaction, returning its commit timestamp.
    ///
    /// Read-only transactions commit locally and report their begin
    /// timestamp. Losing the terminal compare-and-swap to another
    /// committer is idempotent; losing it to a rollback surfaces
    /// `ConcurrentStateChange`.
    pub fn commit(&self, txn: &Arc<TxnView>) -> LatticeResult<TxnId> {
        match txn.state() {
            TxnState::Committed => {
                return Ok(txn.commit_timestamp().unwrap_or_else(|| txn.id()));
            }
            TxnState::RolledBack => {
                return Err(LatticeError::TransactionNotActive {
                    txn_id: txn.id(),
                    state: TxnState::RolledBack,
                });
            }
            TxnState::Active => {}
        }
        if !txn.is_writable() {
            self.stats.record_committed();
            return Ok(txn.id());
        }

        let commit_ts = self.oracle.next_timestamp()?;
        let won = self.store.compare_and_set_state(
            txn.id(),
            TxnState::Active,
            TxnState::Committed,
            Some(commit_ts),
        )?;
        if won {
            self.stats.record_committed();
            tracing::debug!(txn_id = %txn.id(), commit_ts = %commit_ts, "committed transaction");
            return Ok(commit_ts);
        }

        // Lost the race; observe the persisted outcome.
        self.store.invalidate(txn.id());
        let current = self.store.transaction(txn.id())?;
        match (current.state(), current.commit_timestamp()) {
            (TxnState::Committed, Some(actual_ts)) => Ok(actual_ts),
            (TxnState::Committed, None) => Err(LatticeError::corruption(format!(
                "transaction {} committed without a commit timestamp",
                txn.id()
            ))),
            _ => Err(LatticeError::ConcurrentStateChange { txn_id: txn.id() }),
        }
    }

    /// Rolls back a transaction. Idempotent when already rolled back;
    /// fails with `AlreadyCommitted` when the commit won.
    pub fn rollback(&self, txn: &Arc<TxnView>) -> LatticeResult<()> {
        match txn.state() {
            TxnState::RolledBack => return Ok(()),
            TxnState::Committed => {
                return Err(LatticeError::AlreadyCommitted {
                    txn_id: txn.id(),
                    commit_ts: txn.commit_timestamp().unwrap_or(TxnId::INVALID),
                });
            }
            TxnState::Active => {}
        }
        if !txn.is_writable() {
            self.stats.record_rolled_back();
            return Ok(());
        }

        let won = self.store.compare_and_set_state(
            txn.id(),
            TxnState::Active,
            TxnState::RolledBack,
            None,
        )?;
        if won {
            self.stats.record_rolled_back();
            tracing::debug!(txn_id = %txn.id(), "rolled back transaction");
            return Ok(());
        }

        self.store.invalidate(txn.id());
        let current = self.store.transaction(txn.id())?;
        match current.state() {
            TxnState::RolledBack => Ok(()),
            TxnState::Committed => Err(LatticeError::AlreadyCommitted {
                txn_id: txn.id(),
                commit_ts: current.commit_timestamp().unwrap_or(TxnId::INVALID),
            }),
            TxnState::Active => Err(LatticeError::ConcurrentStateChange { txn_id: txn.id() }),
        }
    }

    /// Refreshes the transaction's liveness heartbeat.
    pub fn keep_alive(&self, txn: &Arc<TxnView>) -> LatticeResult<bool> {
        if !txn.is_writable() {
            return Ok(true);
        }
        self.store.keep_alive(txn.id())
    }

    fn check_parent(&self, parent: &TxnView, table: Option<TableId>) -> LatticeResult<()> {
        let parent_state = parent.effective_state();
        if parent_state != TxnState::Active {
            return Err(LatticeError::ParentNotActive {
                parent_id: parent.id(),
                state: parent_state,
            });
        }
        if let Some(table_id) = table {
            if !parent.is_writable() {
                return Err(LatticeError::TransactionNotElevated {
                    txn_id: parent.id(),
                    table: table_id,
                });
            }
        }
        Ok(())
    }

    fn create(
        &self,
        id: TxnId,
        parent: Option<Arc<TxnView>>,
        isolation: IsolationLevel,
        additive: bool,
        table: Option<TableId>,
    ) -> LatticeResult<Arc<TxnView>> {
        let parent_id = parent.as_ref().map_or(TxnId::INVALID, |p| p.id());
        let record =
            TxnRecord::new_active(id, parent_id, isolation, additive, table, now_millis());
        if record.is_writable() {
            self.store.record_transaction(&record)?;
        }
        self.stats.record_begun();
        tracing::debug!(
            txn_id = %id,
            parent_id = %parent_id,
            writable = record.is_writable(),
            "began transaction"
        );
        Ok(Arc::new(TxnView::new(&record, parent)))
    }

    fn ensure_writable(&self, txn: &Arc<TxnView>, table: TableId) -> LatticeResult<()> {
        if txn.state() != TxnState::Active {
            return Err(LatticeError::TransactionNotActive {
                txn_id: txn.id(),
                state: txn.state(),
            });
        }
        if let Some(parent) = txn.parent() {
            if !parent.is_writable() {
                self.ensure_writable(parent, table)?;
            }
        }
        if txn.is_writable() {
            if !txn.writes_to().contains(&table) {
                self.store.elevate(txn.id(), table)?;
            }
        } else {
            // First write: the transaction becomes durable here.
            let record = TxnRecord {
                id: txn.id(),
                parent_id: txn.parent_id(),
                isolation: txn.isolation(),
                additive: txn.is_additive(),
                state: TxnState::Active,
                commit_ts: TxnId::INVALID,
                destination_tables: vec![table],
                last_keep_alive_ms: now_millis(),
            };
            self.store.record_transaction(&record)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TxnLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnLifecycleManager")
            .field("begun", &self.stats.begun())
            .field("committed", &self.stats.committed())
            .field("rolled_back", &self.stats.rolled_back())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TxnConfig;
    use crate::oracle::{BlockTimestampOracle, MemSequencePersistor};
    use crate::store::{CachedTxnStore, MemTxnPartition, PartitionTxnStore};

    fn manager() -> (TxnLifecycleManager, Arc<MemTxnPartition>) {
        let config = TxnConfig::for_testing();
        let partition = Arc::new(MemTxnPartition::new());
        let oracle: Arc<dyn TimestampSource> =
            Arc::new(BlockTimestampOracle::new(MemSequencePersistor::new(), 16).unwrap());
        let inner = PartitionTxnStore::new(Arc::clone(&partition), Arc::clone(&oracle), &config);
        let store: Arc<dyn TxnStore> = Arc::new(CachedTxnStore::from_config(inner, &config));
        (TxnLifecycleManager::new(oracle, store), partition)
    }

    fn table(id: u64) -> Option<TableId> {
        Some(TableId::new(id))
    }

    #[test]
    fn test_begin_and_commit() {
        let (manager, _) = manager();
        let txn = manager.begin_transaction(table(1)).unwrap();
        assert!(txn.id().is_valid());
        assert!(txn.is_writable());

        let commit_ts = manager.commit(&txn).unwrap();
        assert!(commit_ts > txn.id());

        let view = manager.store().transaction(txn.id()).unwrap();
        assert_eq!(view.state(), TxnState::Committed);
        assert_eq!(view.commit_timestamp(), Some(commit_ts));
    }

    #[test]
    fn test_read_only_transactions_never_persisted() {
        let (manager, partition) = manager();
        let txn = manager.begin_transaction(None).unwrap();
        assert_eq!(partition.row_count(), 0);

        // Commit reports the begin timestamp and burns no id.
        let commit_ts = manager.commit(&txn).unwrap();
        assert_eq!(commit_ts, txn.id());

        let next = manager.begin_transaction(None).unwrap();
        assert_eq!(next.id().as_u64(), txn.id().as_u64() + 1);
    }

    #[test]
    fn test_commit_race_is_idempotent() {
        let (manager, _) = manager();
        let txn = manager.begin_transaction(table(1)).unwrap();
        let first = manager.commit(&txn).unwrap();
        // The handle still reads ACTIVE; a second commit loses the CAS
        // and reports the persisted timestamp.
        let second = manager.commit(&txn).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_commit_after_rollback() {
        let (manager, _) = manager();
        let txn = manager.begin_transaction(table(1)).unwrap();
        manager.rollback(&txn).unwrap();

        assert!(matches!(
            manager.commit(&txn),
            Err(LatticeError::ConcurrentStateChange { .. })
        ));
    }

    #[test]
    fn test_rollback_idempotent_but_not_after_commit() {
        let (manager, _) = manager();
        let txn = manager.begin_transaction(table(1)).unwrap();
        manager.rollback(&txn).unwrap();
        manager.rollback(&txn).unwrap();

        let committed = manager.begin_transaction(table(1)).unwrap();
        manager.commit(&committed).unwrap();
        assert!(matches!(
            manager.rollback(&committed),
            Err(LatticeError::AlreadyCommitted { .. })
        ));
    }

    #[test]
    fn test_child_requires_active_parent() {
        let (manager, _) = manager();
        let parent = manager.begin_transaction(table(1)).unwrap();
        manager.commit(&parent).unwrap();

        // Re-fetch so the terminal state is visible to the check.
        let parent = manager.store().transaction(parent.id()).unwrap();
        assert!(matches!(
            manager.begin_child_transaction(&parent, table(1)),
            Err(LatticeError::ParentNotActive { .. })
        ));
    }

    #[test]
    fn test_writable_child_requires_writable_parent() {
        let (manager, _) = manager();
        let parent = manager.begin_transaction(None).unwrap();
        assert!(matches!(
            manager.begin_child_transaction(&parent, table(1)),
            Err(LatticeError::TransactionNotElevated { .. })
        ));

        // A read-only child is fine; elevation persists the chain later.
        let child = manager.begin_child_transaction(&parent, None).unwrap();
        assert!(!child.is_writable());
    }

    #[test]
    fn test_child_inherits_parent_chain() {
        let (manager, _) = manager();
        let parent = manager.begin_transaction(table(1)).unwrap();
        let child = manager.begin_child_transaction(&parent, table(1)).unwrap();

        assert_eq!(child.parent_id(), parent.id());
        assert!(child.id() > parent.id());
        assert!(child.chain_contains(parent.id()));
    }

    #[test]
    fn test_elevation_persists_read_only_chain() {
        let (manager, partition) = manager();
        let root = manager.begin_transaction(None).unwrap();
        let child = manager.begin_child_transaction(&root, None).unwrap();
        assert_eq!(partition.row_count(), 0);

        let elevated = manager
            .elevate_transaction(&child, TableId::new(4))
            .unwrap();
        assert!(elevated.is_writable());
        assert_eq!(elevated.writes_to(), &[TableId::new(4)]);
        // Both the child and its formerly read-only root are durable.
        assert_eq!(partition.row_count(), 2);

        let stored_root = manager.store().transaction(root.id()).unwrap();
        assert_eq!(stored_root.writes_to(), &[TableId::new(4)]);
    }

    #[test]
    fn test_elevate_additional_table() {
        let (manager, _) = manager();
        let txn = manager.begin_transaction(table(1)).unwrap();
        let elevated = manager.elevate_transaction(&txn, TableId::new(2)).unwrap();
        assert_eq!(
            elevated.writes_to(),
            &[TableId::new(1), TableId::new(2)]
        );
    }

    #[test]
    fn test_chain_reuses_commit_timestamp() {
        let (manager, _) = manager();
        let parent = manager.begin_transaction(table(1)).unwrap();
        let first = manager.begin_child_transaction(&parent, table(1)).unwrap();

        let successor = manager
            .chain_transaction(
                Some(&parent),
                IsolationLevel::SnapshotIsolation,
                false,
                table(1),
                &first,
            )
            .unwrap();

        let committed = manager.store().transaction(first.id()).unwrap();
        assert_eq!(committed.state(), TxnState::Committed);
        assert_eq!(committed.commit_timestamp(), Some(successor.id()));
        assert_eq!(successor.parent_id(), parent.id());
    }

    #[test]
    fn test_chain_read_only_predecessor_keeps_id() {
        let (manager, _) = manager();
        let reader = manager.begin_transaction(None).unwrap();
        let successor = manager
            .chain_transaction(
                None,
                IsolationLevel::SnapshotIsolation,
                false,
                table(1),
                &reader,
            )
            .unwrap();
        assert_eq!(successor.id(), reader.id());
        assert!(successor.is_writable());
    }

    #[test]
    fn test_keep_alive() {
        let (manager, _) = manager();
        let writable = manager.begin_transaction(table(1)).unwrap();
        assert!(manager.keep_alive(&writable).unwrap());

        let reader = manager.begin_transaction(None).unwrap();
        assert!(manager.keep_alive(&reader).unwrap());
    }

    #[test]
    fn test_stats() {
        let (manager, _) = manager();
        let t1 = manager.begin_transaction(table(1)).unwrap();
        let t2 = manager.begin_transaction(table(1)).unwrap();
        manager.commit(&t1).unwrap();
        manager.rollback(&t2).unwrap();

        assert_eq!(manager.stats().begun(), 2);
        assert_eq!(manager.stats().committed(), 1);
        assert_eq!(manager.stats().rolled_back(), 1);
    }
}
