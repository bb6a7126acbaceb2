//! Cell-at-a-time visibility filtering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lattice_common::{LatticeResult, TxnId, TxnState};
use lattice_txn::{TxnSupplier, TxnView};

use crate::data::{CellKind, DataCell, TxnResolution};
use crate::filter::{ReturnCode, TxnFilter};
use crate::resolver::ReadResolver;

/// Unpacked visibility filter: judges one cell at a time against the
/// reader's snapshot.
///
/// Writer outcomes come from three places, in order of preference: a
/// commit-timestamp cell on the row itself, this scan's local view
/// cache, and finally the transaction supplier. Outcomes that had to
/// be computed and turned out settled are handed to the read resolver
/// so the next scan finds them on the row.
pub struct SimpleTxnFilter {
    reader: Arc<TxnView>,
    supplier: Arc<dyn TxnSupplier>,
    resolver: Arc<dyn ReadResolver>,
    /// Views resolved during this scan; outcomes never regress, so the
    /// cache is kept across rows.
    views: HashMap<TxnId, Arc<TxnView>>,
    /// Versions whose outcome is already persisted on, or enqueued
    /// for, the current row.
    row_resolved: HashSet<TxnId>,
    visible_tombstones: Vec<TxnId>,
    visible_anti_tombstones: Vec<TxnId>,
    row_present: bool,
}

impl SimpleTxnFilter {
    /// Creates a filter for `reader`.
    pub fn new(
        reader: Arc<TxnView>,
        supplier: Arc<dyn TxnSupplier>,
        resolver: Arc<dyn ReadResolver>,
    ) -> Self {
        Self {
            reader,
            supplier,
            resolver,
            views: HashMap::new(),
            row_resolved: HashSet::new(),
            visible_tombstones: Vec::new(),
            visible_anti_tombstones: Vec::new(),
            row_present: false,
        }
    }

    /// The transaction this filter reads for.
    #[must_use]
    pub fn reader(&self) -> &Arc<TxnView> {
        &self.reader
    }

    fn cache_resolution(&mut self, cell: &DataCell) -> LatticeResult<()> {
        let version = cell.version;
        self.row_resolved.insert(version);
        if self.views.contains_key(&version) {
            return Ok(());
        }
        // A persisted resolution means the writer's whole chain
        // settled, and a settled chain cannot include the still-active
        // reader, so a parentless stand-in judges visibility the same
        // way the full chain would.
        let stand_in = TxnView::read_only(version, self.reader.isolation());
        let view = match cell.decode_commit_timestamp()? {
            TxnResolution::Committed(ts) => stand_in.with_state(TxnState::Committed, Some(ts)),
            TxnResolution::RolledBack => stand_in.with_state(TxnState::RolledBack, None),
        };
        self.views.insert(version, Arc::new(view));
        Ok(())
    }

    fn fetch(&mut self, version: TxnId) -> LatticeResult<Arc<TxnView>> {
        if let Some(view) = self.views.get(&version) {
            return Ok(Arc::clone(view));
        }
        let view = self.supplier.transaction(version)?;
        self.views.insert(version, Arc::clone(&view));
        Ok(view)
    }

    fn is_visible(&mut self, version: TxnId) -> LatticeResult<bool> {
        let writer = self.fetch(version)?;
        Ok(self.reader.can_see(&writer))
    }

    /// Hands a settled outcome to the resolver unless this row already
    /// carries it.
    fn roll_forward(&mut self, cell: &DataCell) -> LatticeResult<()> {
        if self.row_resolved.contains(&cell.version) {
            return Ok(());
        }
        let writer = self.fetch(cell.version)?;
        let outcome = if writer.effective_state() == TxnState::RolledBack {
            Some(TxnResolution::RolledBack)
        } else {
            writer.effective_commit_timestamp().map(TxnResolution::Committed)
        };
        if let Some(outcome) = outcome {
            self.row_resolved.insert(cell.version);
            self.resolver.resolve(cell.row.clone(), cell.version, outcome);
        }
        Ok(())
    }

    fn check_visibility(&mut self, cell: &DataCell) -> LatticeResult<ReturnCode> {
        let version = cell.version;
        // A visible tombstone kills every version at or below it; a
        // visible anti-tombstone kills everything strictly below its
        // re-insert.
        if self.visible_tombstones.iter().any(|t| version <= *t) {
            return Ok(ReturnCode::Skip);
        }
        if self.visible_anti_tombstones.iter().any(|a| version < *a) {
            return Ok(ReturnCode::Skip);
        }
        if self.is_visible(version)? {
            self.row_present = true;
            Ok(ReturnCode::Include)
        } else {
            Ok(ReturnCode::Skip)
        }
    }
}

impl TxnFilter for SimpleTxnFilter {
    fn filter_cell(&mut self, cell: &DataCell) -> LatticeResult<ReturnCode> {
        match cell.kind {
            CellKind::CommitTimestamp => {
                self.cache_resolution(cell)?;
                Ok(ReturnCode::Skip)
            }
            CellKind::Other => Ok(ReturnCode::Skip),
            CellKind::Tombstone => {
                self.roll_forward(cell)?;
                if self.is_visible(cell.version)? {
                    self.visible_tombstones.push(cell.version);
                }
                Ok(ReturnCode::Skip)
            }
            CellKind::AntiTombstone => {
                self.roll_forward(cell)?;
                if self.is_visible(cell.version)? {
                    self.visible_anti_tombstones.push(cell.version);
                }
                Ok(ReturnCode::Skip)
            }
            CellKind::UserData => {
                self.roll_forward(cell)?;
                self.check_visibility(cell)
            }
        }
    }

    fn next_row(&mut self) {
        self.row_resolved.clear();
        self.visible_tombstones.clear();
        self.visible_anti_tombstones.clear();
        self.row_present = false;
    }

    fn exclude_row(&self) -> bool {
        !self.row_present
    }
}

impl std::fmt::Debug for SimpleTxnFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleTxnFilter")
            .field("reader", &self.reader.id())
            .field("cached_views", &self.views.len())
            .finish()
    }
}
