//! Packed-row filtering with column accumulation.

use std::collections::BTreeMap;

use bytes::Bytes;

use lattice_common::LatticeResult;

use crate::data::{decode_packed_entry, encode_packed_entry, CellKind, DataCell};
use crate::filter::{ReturnCode, RowState, SimpleTxnFilter, TxnFilter};

/// Packed visibility filter: composes transaction visibility with a
/// column accumulator.
///
/// Visibility is delegated to the wrapped [`SimpleTxnFilter`]
/// unchanged. Each visible packed version is decoded and its fields
/// merged newest-first: the first visible version to carry a wanted
/// column wins, older versions only fill columns still missing. The
/// caller's predicate decides which columns are wanted (projection
/// pushdown); in count-only mode the first visible version finishes
/// the row without decoding anything.
///
/// Accumulated cells are consumed, not emitted: the driver takes the
/// row's merged result from [`PackedTxnFilter::produce_accumulated_cell`]
/// at the row boundary.
pub struct PackedTxnFilter<P> {
    inner: SimpleTxnFilter,
    predicate: P,
    count_only: bool,
    state: RowState,
    accumulated: BTreeMap<u16, Bytes>,
    /// Newest visible packed cell; template for the merged result.
    template: Option<DataCell>,
}

impl<P: Fn(u16) -> bool> PackedTxnFilter<P> {
    /// Wraps `inner` with a column accumulator.
    pub fn new(inner: SimpleTxnFilter, predicate: P, count_only: bool) -> Self {
        Self {
            inner,
            predicate,
            count_only,
            state: RowState::ScanningRow,
            accumulated: BTreeMap::new(),
            template: None,
        }
    }

    /// Accumulation progress within the current row.
    #[must_use]
    pub fn row_state(&self) -> RowState {
        self.state
    }

    /// The row's merged output, or `None` when nothing was visible.
    #[must_use]
    pub fn produce_accumulated_cell(&self) -> Option<DataCell> {
        let template = self.template.as_ref()?;
        if self.count_only {
            return Some(template.clone());
        }
        let fields: Vec<(u16, Bytes)> = self
            .accumulated
            .iter()
            .map(|(qualifier, value)| (*qualifier, value.clone()))
            .collect();
        Some(DataCell::user(
            template.row.clone(),
            template.version,
            encode_packed_entry(&fields),
        ))
    }

    fn accumulate(&mut self, cell: &DataCell) -> LatticeResult<ReturnCode> {
        if self.state == RowState::RowDone {
            return Ok(ReturnCode::SeekNextRow);
        }
        if self.template.is_none() {
            self.template = Some(cell.clone());
        }
        if self.count_only {
            self.state = RowState::RowDone;
            return Ok(ReturnCode::IncludeAndSeekNextRow);
        }
        for (qualifier, value) in decode_packed_entry(&cell.value)? {
            if (self.predicate)(qualifier) {
                // Newest version first: only fill columns still missing.
                self.accumulated.entry(qualifier).or_insert(value);
            }
        }
        self.state = RowState::Accumulating;
        Ok(ReturnCode::Skip)
    }
}

impl<P: Fn(u16) -> bool> TxnFilter for PackedTxnFilter<P> {
    fn filter_cell(&mut self, cell: &DataCell) -> LatticeResult<ReturnCode> {
        let code = self.inner.filter_cell(cell)?;
        match cell.kind {
            CellKind::UserData => match code {
                ReturnCode::Include | ReturnCode::IncludeAndSeekNextRow => self.accumulate(cell),
                _ => Ok(ReturnCode::Skip),
            },
            _ => Ok(code),
        }
    }

    fn next_row(&mut self) {
        self.inner.next_row();
        self.state = RowState::ScanningRow;
        self.accumulated.clear();
        self.template = None;
    }

    fn exclude_row(&self) -> bool {
        self.template.is_none()
    }
}

impl<P> std::fmt::Debug for PackedTxnFilter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedTxnFilter")
            .field("state", &self.state)
            .field("count_only", &self.count_only)
            .field("accumulated", &self.accumulated.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use lattice_common::{IsolationLevel, LatticeError, LatticeResult, TableId, TxnId, TxnState};
    use lattice_txn::{TxnRecord, TxnSupplier, TxnView};
    use parking_lot::Mutex;

    use crate::resolver::NoopReadResolver;

    #[derive(Default)]
    struct FixedSupplier(Mutex<HashMap<TxnId, Arc<TxnView>>>);

    impl FixedSupplier {
        fn with(views: Vec<Arc<TxnView>>) -> Arc<Self> {
            let supplier = Self::default();
            for view in views {
                supplier.0.lock().insert(view.id(), view);
            }
            Arc::new(supplier)
        }
    }

    impl TxnSupplier for FixedSupplier {
        fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
            self.0
                .lock()
                .get(&id)
                .cloned()
                .ok_or(LatticeError::TransactionNotFound { txn_id: id })
        }

        fn transaction_if_cached(&self, id: TxnId) -> Option<Arc<TxnView>> {
            self.0.lock().get(&id).cloned()
        }

        fn invalidate(&self, _id: TxnId) {}
    }

    fn committed(id: u64, commit_ts: u64) -> Arc<TxnView> {
        let mut record = TxnRecord::new_active(
            TxnId::new(id),
            TxnId::INVALID,
            IsolationLevel::SnapshotIsolation,
            false,
            Some(TableId::new(1)),
            0,
        );
        record.state = TxnState::Committed;
        record.commit_ts = TxnId::new(commit_ts);
        Arc::new(TxnView::new(&record, None))
    }

    fn active(id: u64) -> Arc<TxnView> {
        let record = TxnRecord::new_active(
            TxnId::new(id),
            TxnId::INVALID,
            IsolationLevel::SnapshotIsolation,
            false,
            Some(TableId::new(1)),
            0,
        );
        Arc::new(TxnView::new(&record, None))
    }

    fn reader(id: u64) -> Arc<TxnView> {
        Arc::new(TxnView::read_only(
            TxnId::new(id),
            IsolationLevel::SnapshotIsolation,
        ))
    }

    fn packed(version: u64, fields: &[(u16, &'static [u8])]) -> DataCell {
        let fields: Vec<(u16, Bytes)> = fields
            .iter()
            .map(|(q, v)| (*q, Bytes::from_static(v)))
            .collect();
        DataCell::user(
            Bytes::from_static(b"r1"),
            TxnId::new(version),
            encode_packed_entry(&fields),
        )
    }

    fn filter<P: Fn(u16) -> bool>(
        views: Vec<Arc<TxnView>>,
        reader_id: u64,
        predicate: P,
        count_only: bool,
    ) -> PackedTxnFilter<P> {
        let inner = SimpleTxnFilter::new(
            reader(reader_id),
            FixedSupplier::with(views),
            Arc::new(NoopReadResolver),
        );
        PackedTxnFilter::new(inner, predicate, count_only)
    }

    #[test]
    fn test_merges_sparse_versions_newest_first() {
        let mut filter = filter(
            vec![committed(1, 2), committed(3, 4)],
            10,
            |_| true,
            false,
        );

        // Newest version rewrote only column 2.
        assert_eq!(
            filter
                .filter_cell(&packed(3, &[(2, b"new")]))
                .unwrap(),
            ReturnCode::Skip
        );
        assert_eq!(filter.row_state(), RowState::Accumulating);
        assert_eq!(
            filter
                .filter_cell(&packed(1, &[(1, b"a"), (2, b"old")]))
                .unwrap(),
            ReturnCode::Skip
        );

        let merged = filter.produce_accumulated_cell().unwrap();
        assert_eq!(merged.version, TxnId::new(3));
        let fields = decode_packed_entry(&merged.value).unwrap();
        assert_eq!(
            fields,
            vec![
                (1, Bytes::from_static(b"a")),
                (2, Bytes::from_static(b"new"))
            ]
        );
    }

    #[test]
    fn test_predicate_projects_columns() {
        let mut filter = filter(vec![committed(1, 2)], 10, |q| q == 2, false);

        filter
            .filter_cell(&packed(1, &[(1, b"a"), (2, b"b"), (3, b"c")]))
            .unwrap();

        let merged = filter.produce_accumulated_cell().unwrap();
        let fields = decode_packed_entry(&merged.value).unwrap();
        assert_eq!(fields, vec![(2, Bytes::from_static(b"b"))]);
    }

    #[test]
    fn test_invisible_versions_do_not_accumulate() {
        let mut filter = filter(
            vec![active(5), committed(1, 2)],
            10,
            |_| true,
            false,
        );

        assert_eq!(
            filter.filter_cell(&packed(5, &[(1, b"dirty")])).unwrap(),
            ReturnCode::Skip
        );
        assert_eq!(filter.row_state(), RowState::ScanningRow);
        filter.filter_cell(&packed(1, &[(1, b"clean")])).unwrap();

        let merged = filter.produce_accumulated_cell().unwrap();
        assert_eq!(merged.version, TxnId::new(1));
        let fields = decode_packed_entry(&merged.value).unwrap();
        assert_eq!(fields, vec![(1, Bytes::from_static(b"clean"))]);
    }

    #[test]
    fn test_count_only_finishes_on_first_visible_version() {
        let mut filter = filter(
            vec![committed(3, 4), committed(1, 2)],
            10,
            |_| true,
            true,
        );

        let newest = packed(3, &[(1, b"x")]);
        assert_eq!(
            filter.filter_cell(&newest).unwrap(),
            ReturnCode::IncludeAndSeekNextRow
        );
        assert_eq!(filter.row_state(), RowState::RowDone);
        // A straggling cell after completion just seeks on.
        assert_eq!(
            filter.filter_cell(&packed(1, &[(1, b"y")])).unwrap(),
            ReturnCode::SeekNextRow
        );
        assert_eq!(filter.produce_accumulated_cell().unwrap(), newest);
    }

    #[test]
    fn test_exclude_row_and_reset() {
        let mut filter = filter(vec![active(5)], 10, |_| true, false);

        filter.filter_cell(&packed(5, &[(1, b"dirty")])).unwrap();
        assert!(filter.exclude_row());
        assert!(filter.produce_accumulated_cell().is_none());

        filter.next_row();
        assert_eq!(filter.row_state(), RowState::ScanningRow);
    }
}
