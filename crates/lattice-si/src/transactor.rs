//! Batch write processing: conflict detection, constraint checks, and
//! translation of mutations into versioned cells.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;

use lattice_common::{LatticeError, LatticeResult, TxnId, TxnState};
use lattice_txn::{TxnSupplier, TxnView};

use crate::data::{CellKind, DataCell, KvMutation, MutationKind, TxnResolution};
use crate::partition::Partition;

/// Per-mutation outcome of a batch write.
///
/// Conflicts and constraint violations are ordinary values here, not
/// errors: one contended row must not poison its batch-mates. Only an
/// infrastructure failure aborts the batch, marking the rest
/// [`MutationStatus::NotRun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    /// The mutation was applied.
    Success,
    /// An earlier mutation's failure aborted the batch before this one.
    NotRun,
    /// The row was written by a conflicting transaction.
    Conflict(ConflictDetail),
    /// The caller's constraint checker rejected the mutation.
    ConstraintViolation(String),
    /// Reading or writing the row failed.
    Failure(String),
}

impl MutationStatus {
    /// Returns true if the mutation was applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, MutationStatus::Success)
    }
}

/// The two transactions and the row behind a [`MutationStatus::Conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetail {
    /// The transaction whose write was refused.
    pub txn_id: TxnId,
    /// The transaction already holding the row.
    pub conflicting_txn_id: TxnId,
    /// The contended row key.
    pub row: Bytes,
}

impl ConflictDetail {
    /// Converts this detail into the equivalent error, for callers that
    /// want to fail the whole operation on first conflict.
    #[must_use]
    pub fn into_error(self) -> LatticeError {
        LatticeError::WriteConflict {
            txn_id: self.txn_id,
            conflicting_txn_id: self.conflicting_txn_id,
            row: self.row,
        }
    }
}

/// Row-level check applied between conflict detection and the physical
/// write. Returning a status vetoes the mutation.
///
/// `visible` is the newest row value the writing transaction can see,
/// which is what uniqueness and foreign-key checks compare against.
pub trait ConstraintChecker: Send + Sync {
    /// Judges one mutation against the row's visible state.
    fn check(
        &self,
        txn: &TxnView,
        row: &[u8],
        visible: Option<&DataCell>,
        mutation: &KvMutation,
    ) -> Option<MutationStatus>;
}

/// Accepts every mutation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConstraint;

impl ConstraintChecker for NoConstraint {
    fn check(
        &self,
        _txn: &TxnView,
        _row: &[u8],
        _visible: Option<&DataCell>,
        _mutation: &KvMutation,
    ) -> Option<MutationStatus> {
        None
    }
}

/// Visible row state gathered before translating a mutation.
struct RowImage {
    /// Newest visible user cell for the written qualifier.
    cell: Option<DataCell>,
    /// True if a visible tombstone deletes the row and no newer visible
    /// anti-tombstone revives it.
    deleted: bool,
}

/// Applies transactional write batches to a partition.
///
/// For each mutation: read the target row, detect write-write
/// conflicts against every version on it, run the caller's constraint
/// check against the visible row state, translate the mutation into
/// versioned cells, and write them. Each step's outcome is reported
/// per row.
pub struct Transactor {
    supplier: Arc<dyn TxnSupplier>,
}

impl Transactor {
    /// Creates a transactor resolving writer states through `supplier`.
    pub fn new(supplier: Arc<dyn TxnSupplier>) -> Self {
        Self { supplier }
    }

    /// Applies `mutations` under `txn`, returning one status per
    /// mutation in input order.
    ///
    /// `txn` must be elevated for the partition's table. User cells are
    /// written under `qualifier` at version `txn.id()`. A conflict or
    /// constraint violation skips its own mutation only; an
    /// infrastructure error aborts the remainder of the batch.
    pub fn process_batch<P: Partition>(
        &self,
        partition: &P,
        txn: &Arc<TxnView>,
        qualifier: u16,
        checker: &dyn ConstraintChecker,
        mutations: &[KvMutation],
    ) -> LatticeResult<Vec<MutationStatus>> {
        let table = partition.table_id();
        if !txn.writes_to().contains(&table) {
            return Err(LatticeError::TransactionNotElevated {
                txn_id: txn.id(),
                table,
            });
        }

        let mut statuses = Vec::with_capacity(mutations.len());
        let mut views: HashMap<TxnId, Arc<TxnView>> = HashMap::new();
        for (index, mutation) in mutations.iter().enumerate() {
            match self.apply_mutation(partition, txn, qualifier, checker, mutation, &mut views) {
                Ok(status) => statuses.push(status),
                Err(error) => {
                    tracing::warn!(
                        txn_id = %txn.id(),
                        row = ?mutation.row,
                        %error,
                        "mutation failed, aborting remainder of batch"
                    );
                    statuses.push(MutationStatus::Failure(error.to_string()));
                    statuses.extend(
                        std::iter::repeat(MutationStatus::NotRun)
                            .take(mutations.len() - index - 1),
                    );
                    break;
                }
            }
        }
        Ok(statuses)
    }

    fn apply_mutation<P: Partition>(
        &self,
        partition: &P,
        txn: &Arc<TxnView>,
        qualifier: u16,
        checker: &dyn ConstraintChecker,
        mutation: &KvMutation,
        views: &mut HashMap<TxnId, Arc<TxnView>>,
    ) -> LatticeResult<MutationStatus> {
        let cells = partition.read_row(&mutation.row)?;
        let resolutions = row_resolutions(&cells)?;

        if let Some(status) = self.find_conflict(txn, &mutation.row, &cells, &resolutions, views)? {
            return Ok(status);
        }
        let image = self.row_image(txn, qualifier, &cells, &resolutions, views)?;
        if let Some(status) = checker.check(txn, &mutation.row, image.cell.as_ref(), mutation) {
            return Ok(status);
        }
        partition.write_cells(translate(txn, qualifier, mutation, &image))?;
        Ok(MutationStatus::Success)
    }

    /// Checks every version on the row against `txn`.
    fn find_conflict(
        &self,
        txn: &Arc<TxnView>,
        row: &Bytes,
        cells: &[DataCell],
        resolutions: &HashMap<TxnId, TxnResolution>,
        views: &mut HashMap<TxnId, Arc<TxnView>>,
    ) -> LatticeResult<Option<MutationStatus>> {
        // Commit-timestamp cells cannot record that their writer was
        // additive, so an additive writer must judge every version
        // through the full view, where the additive exemption applies.
        let use_markers = !txn.is_additive();
        let mut checked: HashSet<TxnId> = HashSet::new();
        for cell in cells {
            if matches!(cell.kind, CellKind::CommitTimestamp | CellKind::Other) {
                continue;
            }
            let version = cell.version;
            if version == txn.id() || !checked.insert(version) {
                continue;
            }
            if use_markers {
                match resolutions.get(&version) {
                    Some(TxnResolution::RolledBack) => continue,
                    Some(TxnResolution::Committed(ts)) => {
                        if *ts > txn.id() {
                            return Ok(Some(self.conflict(txn, version, row)));
                        }
                        continue;
                    }
                    None => {}
                }
            }
            let writer = self.writer(version, views)?;
            if txn.conflicts_with(&writer) {
                return Ok(Some(self.conflict(txn, version, row)));
            }
        }
        Ok(None)
    }

    fn conflict(&self, txn: &Arc<TxnView>, conflicting: TxnId, row: &Bytes) -> MutationStatus {
        tracing::trace!(
            txn_id = %txn.id(),
            conflicting_txn_id = %conflicting,
            "write-write conflict"
        );
        MutationStatus::Conflict(ConflictDetail {
            txn_id: txn.id(),
            conflicting_txn_id: conflicting,
            row: row.clone(),
        })
    }

    /// Computes the row state `txn` sees: the newest visible user cell
    /// under `qualifier` and whether the row stands deleted.
    fn row_image(
        &self,
        txn: &Arc<TxnView>,
        qualifier: u16,
        cells: &[DataCell],
        resolutions: &HashMap<TxnId, TxnResolution>,
        views: &mut HashMap<TxnId, Arc<TxnView>>,
    ) -> LatticeResult<RowImage> {
        let mut tombstones: Vec<TxnId> = Vec::new();
        let mut antis: Vec<TxnId> = Vec::new();
        let mut cell = None;
        // Cells arrive bookkeeping first, then user data, newest
        // version first within each group.
        for c in cells {
            match c.kind {
                CellKind::Tombstone => {
                    if self.version_visible(txn, c.version, resolutions, views)? {
                        tombstones.push(c.version);
                    }
                }
                CellKind::AntiTombstone => {
                    if self.version_visible(txn, c.version, resolutions, views)? {
                        antis.push(c.version);
                    }
                }
                CellKind::UserData if c.qualifier == qualifier => {
                    if tombstones.iter().any(|t| c.version <= *t)
                        || antis.iter().any(|a| c.version < *a)
                    {
                        continue;
                    }
                    if self.version_visible(txn, c.version, resolutions, views)? {
                        cell = Some(c.clone());
                        break;
                    }
                }
                _ => {}
            }
        }
        let deleted = cell.is_none()
            && match (tombstones.iter().max(), antis.iter().max()) {
                (Some(tombstone), Some(anti)) => tombstone > anti,
                (Some(_), None) => true,
                (None, _) => false,
            };
        Ok(RowImage { cell, deleted })
    }

    fn version_visible(
        &self,
        txn: &Arc<TxnView>,
        version: TxnId,
        resolutions: &HashMap<TxnId, TxnResolution>,
        views: &mut HashMap<TxnId, Arc<TxnView>>,
    ) -> LatticeResult<bool> {
        if let Some(resolution) = resolutions.get(&version) {
            return Ok(match resolution {
                TxnResolution::RolledBack => false,
                TxnResolution::Committed(ts) => {
                    let stand_in = TxnView::read_only(version, txn.isolation())
                        .with_state(TxnState::Committed, Some(*ts));
                    txn.can_see(&stand_in)
                }
            });
        }
        let writer = self.writer(version, views)?;
        Ok(txn.can_see(&writer))
    }

    fn writer(
        &self,
        version: TxnId,
        views: &mut HashMap<TxnId, Arc<TxnView>>,
    ) -> LatticeResult<Arc<TxnView>> {
        if let Some(view) = views.get(&version) {
            return Ok(Arc::clone(view));
        }
        let view = self.supplier.transaction(version)?;
        views.insert(version, Arc::clone(&view));
        Ok(view)
    }
}

impl std::fmt::Debug for Transactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactor").finish_non_exhaustive()
    }
}

/// Collects the row's persisted writer outcomes.
fn row_resolutions(cells: &[DataCell]) -> LatticeResult<HashMap<TxnId, TxnResolution>> {
    let mut resolutions = HashMap::new();
    for cell in cells {
        if cell.kind == CellKind::CommitTimestamp {
            resolutions.insert(cell.version, cell.decode_commit_timestamp()?);
        }
    }
    Ok(resolutions)
}

/// Turns one mutation into the cells that realize it at `txn.id()`.
fn translate(
    txn: &Arc<TxnView>,
    qualifier: u16,
    mutation: &KvMutation,
    image: &RowImage,
) -> Vec<DataCell> {
    let row = mutation.row.clone();
    match mutation.kind {
        MutationKind::Delete => vec![DataCell::tombstone(row, txn.id())],
        MutationKind::Insert | MutationKind::Upsert if image.deleted => {
            // Re-inserting over a deleted row revives it with an
            // anti-tombstone so older versions stay dead.
            vec![
                DataCell::anti_tombstone(row.clone(), txn.id()),
                user_cell(row, txn.id(), qualifier, mutation),
            ]
        }
        MutationKind::Insert | MutationKind::Update | MutationKind::Upsert => {
            vec![user_cell(row, txn.id(), qualifier, mutation)]
        }
    }
}

fn user_cell(row: Bytes, version: TxnId, qualifier: u16, mutation: &KvMutation) -> DataCell {
    DataCell {
        qualifier,
        ..DataCell::user(row, version, mutation.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_common::{IsolationLevel, TableId};
    use lattice_txn::TxnRecord;
    use parking_lot::Mutex;

    use crate::data::PACKED_COLUMN;
    use crate::partition::MemPartition;

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

    fn table() -> TableId {
        TableId::new(1)
    }

    fn txn_with(id: u64, additive: bool, state: TxnState, commit_ts: Option<u64>) -> Arc<TxnView> {
        let mut record = TxnRecord::new_active(
            TxnId::new(id),
            TxnId::INVALID,
            IsolationLevel::SnapshotIsolation,
            additive,
            Some(table()),
            0,
        );
        record.state = state;
        record.commit_ts = commit_ts.map_or(TxnId::INVALID, TxnId::new);
        Arc::new(TxnView::new(&record, None))
    }

    fn writer_txn(id: u64) -> Arc<TxnView> {
        txn_with(id, false, TxnState::Active, None)
    }

    fn row() -> Bytes {
        Bytes::from_static(b"r1")
    }

    fn insert(value: &'static [u8]) -> KvMutation {
        KvMutation::insert(row(), Bytes::from_static(value))
    }

    fn user_versions(partition: &MemPartition, key: &Bytes) -> Vec<(CellKind, TxnId)> {
        partition
            .read_row(key)
            .unwrap()
            .iter()
            .map(|cell| (cell.kind, cell.version))
            .collect()
    }

    #[test]
    fn test_write_requires_elevation() {
        let partition = MemPartition::new(table());
        let transactor = Transactor::new(FixedSupplier::with(vec![]));
        let reader = Arc::new(TxnView::read_only(
            TxnId::new(7),
            IsolationLevel::SnapshotIsolation,
        ));

        let result = transactor.process_batch(
            &partition,
            &reader,
            PACKED_COLUMN,
            &NoConstraint,
            &[insert(b"v")],
        );
        assert!(matches!(
            result,
            Err(LatticeError::TransactionNotElevated { .. })
        ));
    }

    #[test]
    fn test_later_commit_conflicts_through_marker_alone() {
        // The supplier is empty: the persisted outcome must carry the
        // conflict decision by itself.
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![
                DataCell::commit_timestamp(row(), TxnId::new(10), TxnId::new(12)),
                DataCell::user(row(), TxnId::new(10), Bytes::from_static(b"theirs")),
            ])
            .unwrap();
        let transactor = Transactor::new(FixedSupplier::with(vec![]));
        let txn = writer_txn(11);

        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"mine")])
            .unwrap();
        assert_eq!(
            statuses,
            vec![MutationStatus::Conflict(ConflictDetail {
                txn_id: TxnId::new(11),
                conflicting_txn_id: TxnId::new(10),
                row: row(),
            })]
        );
        // The losing write left nothing behind.
        assert_eq!(
            user_versions(&partition, &row()),
            vec![
                (CellKind::CommitTimestamp, TxnId::new(10)),
                (CellKind::UserData, TxnId::new(10)),
            ]
        );
    }

    #[test]
    fn test_earlier_commit_does_not_conflict() {
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![
                DataCell::commit_timestamp(row(), TxnId::new(3), TxnId::new(5)),
                DataCell::user(row(), TxnId::new(3), Bytes::from_static(b"old")),
            ])
            .unwrap();
        let transactor = Transactor::new(FixedSupplier::with(vec![]));
        let txn = writer_txn(11);

        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"new")])
            .unwrap();
        assert_eq!(statuses, vec![MutationStatus::Success]);
        assert!(user_versions(&partition, &row())
            .contains(&(CellKind::UserData, TxnId::new(11))));
    }

    #[test]
    fn test_active_writer_conflicts_through_view() {
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![DataCell::user(
                row(),
                TxnId::new(10),
                Bytes::from_static(b"dirty"),
            )])
            .unwrap();
        let transactor = Transactor::new(FixedSupplier::with(vec![writer_txn(10)]));
        let txn = writer_txn(11);

        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"mine")])
            .unwrap();
        assert!(matches!(statuses[0], MutationStatus::Conflict(_)));
    }

    #[test]
    fn test_rolled_back_writer_does_not_conflict() {
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![DataCell::user(
                row(),
                TxnId::new(10),
                Bytes::from_static(b"aborted"),
            )])
            .unwrap();
        let transactor = Transactor::new(FixedSupplier::with(vec![txn_with(
            10,
            false,
            TxnState::RolledBack,
            None,
        )]));
        let txn = writer_txn(11);

        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"mine")])
            .unwrap();
        assert_eq!(statuses, vec![MutationStatus::Success]);
    }

    #[test]
    fn test_self_overwrite_is_not_a_conflict() {
        let partition = MemPartition::new(table());
        let txn = writer_txn(11);
        let transactor = Transactor::new(FixedSupplier::with(vec![Arc::clone(&txn)]));

        let first = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"v1")])
            .unwrap();
        let second = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"v2")])
            .unwrap();
        assert_eq!(first, vec![MutationStatus::Success]);
        assert_eq!(second, vec![MutationStatus::Success]);
    }

    #[test]
    fn test_additive_writers_bypass_the_marker_path() {
        // An additive writer committed after this additive transaction
        // began. The persisted outcome alone would call that a
        // conflict; the full view applies the additive exemption.
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![
                DataCell::commit_timestamp(row(), TxnId::new(10), TxnId::new(20)),
                DataCell::user(row(), TxnId::new(10), Bytes::from_static(b"index")),
            ])
            .unwrap();
        let committed_additive = txn_with(10, true, TxnState::Committed, Some(20));
        let transactor = Transactor::new(FixedSupplier::with(vec![committed_additive]));
        let txn = txn_with(11, true, TxnState::Active, None);

        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"mine")])
            .unwrap();
        assert_eq!(statuses, vec![MutationStatus::Success]);
    }

    #[test]
    fn test_conflict_skips_only_its_own_mutation() {
        let contended = Bytes::from_static(b"r2");
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![DataCell::user(
                contended.clone(),
                TxnId::new(10),
                Bytes::from_static(b"dirty"),
            )])
            .unwrap();
        let transactor = Transactor::new(FixedSupplier::with(vec![writer_txn(10)]));
        let txn = writer_txn(11);

        let mutations = [
            KvMutation::insert(Bytes::from_static(b"r1"), Bytes::from_static(b"a")),
            KvMutation::insert(contended, Bytes::from_static(b"b")),
            KvMutation::insert(Bytes::from_static(b"r3"), Bytes::from_static(b"c")),
        ];
        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &mutations)
            .unwrap();
        assert!(statuses[0].is_success());
        assert!(matches!(statuses[1], MutationStatus::Conflict(_)));
        assert!(statuses[2].is_success());
    }

    #[test]
    fn test_delete_then_reinsert_revives_with_anti_tombstone() {
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![
                DataCell::commit_timestamp(row(), TxnId::new(3), TxnId::new(5)),
                DataCell::user(row(), TxnId::new(3), Bytes::from_static(b"old")),
            ])
            .unwrap();
        let txn = writer_txn(11);
        let transactor = Transactor::new(FixedSupplier::with(vec![Arc::clone(&txn)]));

        let deleted = transactor
            .process_batch(
                &partition,
                &txn,
                PACKED_COLUMN,
                &NoConstraint,
                &[KvMutation::delete(row())],
            )
            .unwrap();
        assert_eq!(deleted, vec![MutationStatus::Success]);

        let revived = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &[insert(b"new")])
            .unwrap();
        assert_eq!(revived, vec![MutationStatus::Success]);

        // The anti-tombstone lands on the tombstone's coordinates and
        // replaces it; the revival alone keeps older versions dead.
        let kinds = user_versions(&partition, &row());
        assert!(!kinds.contains(&(CellKind::Tombstone, TxnId::new(11))));
        assert!(kinds.contains(&(CellKind::AntiTombstone, TxnId::new(11))));
        assert!(kinds.contains(&(CellKind::UserData, TxnId::new(11))));
    }

    #[test]
    fn test_update_over_live_row_writes_plain_cell() {
        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![
                DataCell::commit_timestamp(row(), TxnId::new(3), TxnId::new(5)),
                DataCell::user(row(), TxnId::new(3), Bytes::from_static(b"old")),
            ])
            .unwrap();
        let txn = writer_txn(11);
        let transactor = Transactor::new(FixedSupplier::with(vec![Arc::clone(&txn)]));

        let statuses = transactor
            .process_batch(
                &partition,
                &txn,
                PACKED_COLUMN,
                &NoConstraint,
                &[KvMutation::update(row(), Bytes::from_static(b"new"))],
            )
            .unwrap();
        assert_eq!(statuses, vec![MutationStatus::Success]);
        let kinds = user_versions(&partition, &row());
        assert!(kinds.contains(&(CellKind::UserData, TxnId::new(11))));
        assert!(!kinds.contains(&(CellKind::AntiTombstone, TxnId::new(11))));
    }

    #[test]
    fn test_constraint_violation_vetoes_the_write() {
        struct UniqueRow;
        impl ConstraintChecker for UniqueRow {
            fn check(
                &self,
                _txn: &TxnView,
                _row: &[u8],
                visible: Option<&DataCell>,
                mutation: &KvMutation,
            ) -> Option<MutationStatus> {
                if mutation.kind == MutationKind::Insert && visible.is_some() {
                    return Some(MutationStatus::ConstraintViolation(
                        "duplicate row".to_owned(),
                    ));
                }
                None
            }
        }

        let partition = MemPartition::new(table());
        partition
            .write_cells(vec![
                DataCell::commit_timestamp(row(), TxnId::new(3), TxnId::new(5)),
                DataCell::user(row(), TxnId::new(3), Bytes::from_static(b"existing")),
            ])
            .unwrap();
        let txn = writer_txn(11);
        let transactor = Transactor::new(FixedSupplier::with(vec![Arc::clone(&txn)]));

        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &UniqueRow, &[insert(b"dup")])
            .unwrap();
        assert_eq!(
            statuses,
            vec![MutationStatus::ConstraintViolation(
                "duplicate row".to_owned()
            )]
        );
        // The vetoed version was never written.
        assert!(!user_versions(&partition, &row())
            .contains(&(CellKind::UserData, TxnId::new(11))));
    }

    #[test]
    fn test_storage_failure_marks_remaining_not_run() {
        let partition = MemPartition::new(table());
        partition.set_unavailable(true);
        let txn = writer_txn(11);
        let transactor = Transactor::new(FixedSupplier::with(vec![Arc::clone(&txn)]));

        let mutations = [
            KvMutation::insert(Bytes::from_static(b"r1"), Bytes::from_static(b"a")),
            KvMutation::insert(Bytes::from_static(b"r2"), Bytes::from_static(b"b")),
            KvMutation::insert(Bytes::from_static(b"r3"), Bytes::from_static(b"c")),
        ];
        let statuses = transactor
            .process_batch(&partition, &txn, PACKED_COLUMN, &NoConstraint, &mutations)
            .unwrap();
        assert_eq!(statuses.len(), 3);
        assert!(matches!(statuses[0], MutationStatus::Failure(_)));
        assert_eq!(statuses[1], MutationStatus::NotRun);
        assert_eq!(statuses[2], MutationStatus::NotRun);
    }
}
