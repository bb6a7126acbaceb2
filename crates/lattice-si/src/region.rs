//! Region-level entry point for transactional reads and writes.

use std::sync::Arc;

use bytes::Bytes;

use lattice_common::LatticeResult;
use lattice_txn::{TxnSupplier, TxnView};

use crate::compaction::CompactionState;
use crate::data::{DataCell, KvMutation, MutationKind};
use crate::ddl::{DdlFilter, DdlFilterConfig};
use crate::filter::{PackedTxnFilter, ReturnCode, SimpleTxnFilter, TxnFilter};
use crate::partition::Partition;
use crate::resolver::{NoopReadResolver, ReadResolver};
use crate::transactor::{ConstraintChecker, MutationStatus, Transactor};

/// One partition with the transaction machinery wired around it.
///
/// The region is where writes meet conflict detection and reads meet
/// visibility filtering. Regions for system tables can opt out of
/// snapshot isolation entirely with [`TransactionalRegion::non_transactional`];
/// their writes land as raw cells and their scans return everything.
pub struct TransactionalRegion<P> {
    partition: P,
    supplier: Arc<dyn TxnSupplier>,
    resolver: Arc<dyn ReadResolver>,
    transactor: Transactor,
    transactional: bool,
}

impl<P: Partition> TransactionalRegion<P> {
    /// Creates a region enforcing snapshot isolation.
    pub fn new(
        partition: P,
        supplier: Arc<dyn TxnSupplier>,
        resolver: Arc<dyn ReadResolver>,
    ) -> Self {
        Self {
            partition,
            transactor: Transactor::new(Arc::clone(&supplier)),
            supplier,
            resolver,
            transactional: true,
        }
    }

    /// Creates a region that bypasses visibility and conflict checks.
    pub fn non_transactional(partition: P, supplier: Arc<dyn TxnSupplier>) -> Self {
        Self {
            partition,
            transactor: Transactor::new(Arc::clone(&supplier)),
            supplier,
            resolver: Arc::new(NoopReadResolver),
            transactional: false,
        }
    }

    /// Returns true if this region enforces snapshot isolation.
    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// The underlying partition.
    pub fn partition(&self) -> &P {
        &self.partition
    }

    /// Returns true if `row` falls inside this region's key range.
    pub fn row_in_range(&self, row: &[u8]) -> bool {
        self.partition.row_in_range(row)
    }

    /// A visibility filter over raw cells for `txn`.
    pub fn unpacked_filter(&self, txn: &Arc<TxnView>) -> SimpleTxnFilter {
        SimpleTxnFilter::new(
            Arc::clone(txn),
            Arc::clone(&self.supplier),
            Arc::clone(&self.resolver),
        )
    }

    /// A visibility filter that merges packed versions, keeping the
    /// columns `predicate` accepts.
    pub fn packed_filter<F: Fn(u16) -> bool>(
        &self,
        txn: &Arc<TxnView>,
        predicate: F,
        count_only: bool,
    ) -> PackedTxnFilter<F> {
        PackedTxnFilter::new(self.unpacked_filter(txn), predicate, count_only)
    }

    /// A row rewriter for one compaction run over this region.
    pub fn compaction_filter(&self) -> CompactionState {
        CompactionState::new(Arc::clone(&self.supplier))
    }

    /// A schema-change visibility filter anchored at the DDL
    /// transaction `origin`.
    pub fn ddl_filter(&self, origin: &Arc<TxnView>, config: &DdlFilterConfig) -> DdlFilter {
        DdlFilter::new(Arc::clone(origin), Arc::clone(&self.supplier), config)
    }

    /// Applies `mutations` under `txn`, one status per mutation.
    ///
    /// Transactional regions route through conflict detection and the
    /// constraint checker; non-transactional ones write raw cells
    /// versioned at `txn.id()` with no checks at all.
    pub fn bulk_write(
        &self,
        txn: &Arc<TxnView>,
        qualifier: u16,
        checker: &dyn ConstraintChecker,
        mutations: &[KvMutation],
    ) -> LatticeResult<Vec<MutationStatus>> {
        if !self.transactional {
            let cells = mutations
                .iter()
                .map(|mutation| match mutation.kind {
                    MutationKind::Delete => DataCell::tombstone(mutation.row.clone(), txn.id()),
                    _ => DataCell {
                        qualifier,
                        ..DataCell::user(mutation.row.clone(), txn.id(), mutation.value.clone())
                    },
                })
                .collect();
            self.partition.write_cells(cells)?;
            return Ok(vec![MutationStatus::Success; mutations.len()]);
        }
        self.transactor
            .process_batch(&self.partition, txn, qualifier, checker, mutations)
    }

    /// Scans `[start, end]` and returns the raw cells visible to `txn`.
    pub fn scan_visible(
        &self,
        txn: &Arc<TxnView>,
        start: &[u8],
        end: &[u8],
    ) -> LatticeResult<Vec<DataCell>> {
        let cells = self.partition.scan(start, end)?;
        if !self.transactional {
            return Ok(cells);
        }
        let mut filter = self.unpacked_filter(txn);
        let mut out = Vec::new();
        for (_, row_cells) in group_rows(cells) {
            let mut kept = Vec::new();
            for cell in row_cells {
                match filter.filter_cell(&cell)? {
                    ReturnCode::Include => kept.push(cell),
                    ReturnCode::IncludeAndSeekNextRow => {
                        kept.push(cell);
                        break;
                    }
                    ReturnCode::Skip => {}
                    ReturnCode::SeekNextRow => break,
                    ReturnCode::FilterRow => {
                        kept.clear();
                        break;
                    }
                }
            }
            if !filter.exclude_row() {
                out.append(&mut kept);
            }
            filter.next_row();
        }
        Ok(out)
    }

    /// Scans `[start, end]` and returns one merged cell per row
    /// visible to `txn`, carrying the columns `predicate` accepts.
    pub fn scan_packed<F: Fn(u16) -> bool>(
        &self,
        txn: &Arc<TxnView>,
        predicate: F,
        count_only: bool,
        start: &[u8],
        end: &[u8],
    ) -> LatticeResult<Vec<DataCell>> {
        let cells = self.partition.scan(start, end)?;
        let mut filter = self.packed_filter(txn, predicate, count_only);
        let mut out = Vec::new();
        for (_, row_cells) in group_rows(cells) {
            for cell in row_cells {
                match filter.filter_cell(&cell)? {
                    ReturnCode::IncludeAndSeekNextRow | ReturnCode::SeekNextRow => break,
                    ReturnCode::FilterRow => break,
                    ReturnCode::Include | ReturnCode::Skip => {}
                }
            }
            if let Some(cell) = filter.produce_accumulated_cell() {
                out.push(cell);
            }
            filter.next_row();
        }
        Ok(out)
    }

    /// Compacts `[start, end]`: prunes rolled-back versions and
    /// back-fills commit-timestamp cells. Returns the number of cells
    /// pruned.
    pub fn compact(&self, start: &[u8], end: &[u8]) -> LatticeResult<u64> {
        let mut state = self.compaction_filter();
        for (row, row_cells) in group_rows(self.partition.scan(start, end)?) {
            let kept = state.mutate_row(row_cells)?;
            self.partition.replace_row(&row, kept)?;
        }
        tracing::debug!(
            table = %self.partition.table_id(),
            pruned = state.pruned(),
            "compaction pass finished"
        );
        Ok(state.pruned())
    }
}

impl<P: Partition> std::fmt::Debug for TransactionalRegion<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalRegion")
            .field("table", &self.partition.table_id())
            .field("transactional", &self.transactional)
            .finish()
    }
}

/// Splits a scan result into per-row runs, preserving cell order.
fn group_rows(cells: Vec<DataCell>) -> Vec<(Bytes, Vec<DataCell>)> {
    let mut rows: Vec<(Bytes, Vec<DataCell>)> = Vec::new();
    for cell in cells {
        if rows.last().map_or(true, |(row, _)| *row != cell.row) {
            rows.push((cell.row.clone(), Vec::new()));
        }
        if let Some((_, run)) = rows.last_mut() {
            run.push(cell);
        }
    }
    rows
}
