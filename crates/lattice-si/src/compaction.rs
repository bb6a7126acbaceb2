//! Version pruning and marker back-fill during compaction.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lattice_common::{LatticeResult, TxnId, TxnState};
use lattice_txn::TxnSupplier;

use crate::data::{CellKind, DataCell, TxnResolution};
use crate::partition::CellKey;

/// Row rewriter used while compacting a partition.
///
/// Rolled-back versions and their markers are dropped, settled
/// committed versions gain a commit-timestamp cell if the row lacks
/// one, and in-flight versions pass through untouched. Writer outcomes
/// resolved through the store are remembered for the life of this
/// state, which is scoped to one compaction run.
pub struct CompactionState {
    supplier: Arc<dyn TxnSupplier>,
    resolutions: HashMap<TxnId, Option<TxnResolution>>,
    pruned: u64,
}

impl CompactionState {
    /// Creates state resolving writer outcomes through `supplier`.
    pub fn new(supplier: Arc<dyn TxnSupplier>) -> Self {
        Self {
            supplier,
            resolutions: HashMap::new(),
            pruned: 0,
        }
    }

    /// Cells dropped so far in this run.
    #[must_use]
    pub fn pruned(&self) -> u64 {
        self.pruned
    }

    /// Rewrites one row's cells. The result is unordered; persisting
    /// it through the partition restores storage order.
    pub fn mutate_row(&mut self, cells: Vec<DataCell>) -> LatticeResult<Vec<DataCell>> {
        let mut on_row: HashMap<TxnId, TxnResolution> = HashMap::new();
        for cell in &cells {
            if cell.kind == CellKind::CommitTimestamp {
                on_row.insert(cell.version, cell.decode_commit_timestamp()?);
            }
        }

        let mut kept = Vec::with_capacity(cells.len());
        let mut synthesized: HashSet<TxnId> = HashSet::new();
        for cell in cells {
            let resolution = match on_row.get(&cell.version) {
                Some(resolution) => Some(*resolution),
                None => self.resolve(cell.version)?,
            };
            match resolution {
                Some(TxnResolution::RolledBack) => {
                    // The version never happened; its marker goes too.
                    self.pruned += 1;
                }
                Some(TxnResolution::Committed(ts)) => {
                    if cell.kind != CellKind::CommitTimestamp
                        && !on_row.contains_key(&cell.version)
                        && synthesized.insert(cell.version)
                    {
                        kept.push(DataCell::commit_timestamp(cell.row.clone(), cell.version, ts));
                    }
                    kept.push(cell);
                }
                None => kept.push(cell),
            }
        }
        kept.sort_by_key(CellKey::of);
        Ok(kept)
    }

    fn resolve(&mut self, version: TxnId) -> LatticeResult<Option<TxnResolution>> {
        if let Some(resolution) = self.resolutions.get(&version) {
            return Ok(*resolution);
        }
        let view = self.supplier.transaction(version)?;
        let resolution = if view.effective_state() == TxnState::RolledBack {
            Some(TxnResolution::RolledBack)
        } else {
            view.effective_commit_timestamp()
                .map(TxnResolution::Committed)
        };
        self.resolutions.insert(version, resolution);
        Ok(resolution)
    }
}

impl std::fmt::Debug for CompactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionState")
            .field("resolutions", &self.resolutions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use bytes::Bytes;
    use lattice_common::{IsolationLevel, LatticeError, TableId};
    use lattice_txn::{TxnRecord, TxnView};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingSupplier {
        views: Mutex<HashMap<TxnId, Arc<TxnView>>>,
        fetches: AtomicUsize,
    }

    impl CountingSupplier {
        fn with(views: Vec<Arc<TxnView>>) -> Arc<Self> {
            let supplier = Self::default();
            for view in views {
                supplier.views.lock().insert(view.id(), view);
            }
            Arc::new(supplier)
        }

        fn fetches(&self) -> usize {
            self.fetches.load(AtomicOrdering::SeqCst)
        }
    }

    impl TxnSupplier for CountingSupplier {
        fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
            self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
            self.views
                .lock()
                .get(&id)
                .cloned()
                .ok_or(LatticeError::TransactionNotFound { txn_id: id })
        }

        fn transaction_if_cached(&self, id: TxnId) -> Option<Arc<TxnView>> {
            self.views.lock().get(&id).cloned()
        }

        fn invalidate(&self, _id: TxnId) {}
    }

    fn txn(id: u64, state: TxnState, commit_ts: Option<u64>) -> Arc<TxnView> {
        let mut record = TxnRecord::new_active(
            TxnId::new(id),
            TxnId::INVALID,
            IsolationLevel::SnapshotIsolation,
            false,
            Some(TableId::new(1)),
            0,
        );
        record.state = state;
        record.commit_ts = commit_ts.map_or(TxnId::INVALID, TxnId::new);
        Arc::new(TxnView::new(&record, None))
    }

    fn row() -> Bytes {
        Bytes::from_static(b"r1")
    }

    fn user(version: u64) -> DataCell {
        DataCell::user(row(), TxnId::new(version), Bytes::from_static(b"v"))
    }

    #[test]
    fn test_rolled_back_versions_are_pruned() {
        let supplier = CountingSupplier::with(vec![
            txn(3, TxnState::Committed, Some(4)),
            txn(5, TxnState::RolledBack, None),
        ]);
        let mut state = CompactionState::new(supplier);

        let kept = state
            .mutate_row(vec![
                DataCell::tombstone(row(), TxnId::new(5)),
                user(5),
                user(3),
            ])
            .unwrap();
        assert_eq!(
            kept.iter()
                .map(|c| (c.kind, c.version))
                .collect::<Vec<_>>(),
            vec![
                (CellKind::CommitTimestamp, TxnId::new(3)),
                (CellKind::UserData, TxnId::new(3)),
            ]
        );
        assert_eq!(state.pruned(), 2);
    }

    #[test]
    fn test_committed_versions_gain_markers() {
        let supplier = CountingSupplier::with(vec![txn(5, TxnState::Committed, Some(8))]);
        let mut state = CompactionState::new(supplier);

        let kept = state.mutate_row(vec![user(5)]).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].kind, CellKind::CommitTimestamp);
        assert_eq!(
            kept[0].decode_commit_timestamp().unwrap(),
            TxnResolution::Committed(TxnId::new(8))
        );
        assert_eq!(kept[1], user(5));
    }

    #[test]
    fn test_in_flight_versions_pass_through() {
        let supplier = CountingSupplier::with(vec![txn(5, TxnState::Active, None)]);
        let mut state = CompactionState::new(supplier);

        let kept = state.mutate_row(vec![user(5)]).unwrap();
        assert_eq!(kept, vec![user(5)]);
    }

    #[test]
    fn test_existing_markers_answer_without_the_store() {
        let supplier = CountingSupplier::with(vec![]);
        let mut state = CompactionState::new(Arc::clone(&supplier) as Arc<dyn TxnSupplier>);

        let marker = DataCell::commit_timestamp(row(), TxnId::new(5), TxnId::new(8));
        let kept = state
            .mutate_row(vec![marker.clone(), user(5)])
            .unwrap();
        assert_eq!(kept, vec![marker, user(5)]);
        assert_eq!(supplier.fetches(), 0);
    }

    #[test]
    fn test_rolled_back_marker_goes_with_its_data() {
        let supplier = CountingSupplier::with(vec![]);
        let mut state = CompactionState::new(Arc::clone(&supplier) as Arc<dyn TxnSupplier>);

        let kept = state
            .mutate_row(vec![DataCell::rolled_back_marker(row(), TxnId::new(5)), user(5)])
            .unwrap();
        assert!(kept.is_empty());
        assert_eq!(supplier.fetches(), 0);
    }

    #[test]
    fn test_resolutions_are_remembered_across_rows() {
        let supplier = CountingSupplier::with(vec![txn(5, TxnState::Committed, Some(8))]);
        let mut state = CompactionState::new(Arc::clone(&supplier) as Arc<dyn TxnSupplier>);

        state.mutate_row(vec![user(5)]).unwrap();
        let other = DataCell {
            row: Bytes::from_static(b"r2"),
            ..user(5)
        };
        state.mutate_row(vec![other]).unwrap();
        assert_eq!(supplier.fetches(), 1);
    }
}
