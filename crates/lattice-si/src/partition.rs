//! Versioned cell storage.
//!
//! A [`Partition`] is one contiguous key range of one table. The
//! transaction layer only needs row reads, cell writes, range scans,
//! and whole-row replacement (for compaction); everything else,
//! including durability, belongs to the storage engine behind the
//! trait. [`MemPartition`] is the in-memory implementation used by
//! tests and by single-process embeddings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use bytes::Bytes;
use parking_lot::RwLock;

use lattice_common::{LatticeError, LatticeResult, TableId, TxnId};

use crate::data::{CellKind, DataCell};

/// Ordering key for a cell within a partition.
///
/// Rows sort lexicographically. Within a row, bookkeeping groups come
/// first (commit timestamps, then deletion markers, then user data)
/// and versions scan newest to oldest, so a filter sees resolutions
/// and tombstones before the data they govern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    /// Row key.
    pub row: Bytes,
    /// Kind group, from [`CellKind::group`].
    pub group: u8,
    /// Column qualifier.
    pub qualifier: u16,
    /// Version stored descending: `u64::MAX - version`.
    pub version_desc: u64,
}

impl CellKey {
    /// The key under which `cell` is stored.
    #[must_use]
    pub fn of(cell: &DataCell) -> Self {
        Self {
            row: cell.row.clone(),
            group: cell.kind.group(),
            qualifier: cell.qualifier,
            version_desc: u64::MAX - cell.version.as_u64(),
        }
    }

    /// The version that wrote this cell.
    #[must_use]
    pub fn version(&self) -> TxnId {
        TxnId::new(u64::MAX - self.version_desc)
    }

    fn row_start(row: &[u8]) -> Self {
        Self {
            row: Bytes::copy_from_slice(row),
            group: 0,
            qualifier: 0,
            version_desc: 0,
        }
    }

    fn row_end(row: &[u8]) -> Self {
        Self {
            row: Bytes::copy_from_slice(row),
            group: u8::MAX,
            qualifier: u16::MAX,
            version_desc: u64::MAX,
        }
    }
}

/// A contiguous key range of one table's versioned cells.
pub trait Partition: Send + Sync {
    /// The table this partition belongs to.
    fn table_id(&self) -> TableId;

    /// Reads every cell of `row` in [`CellKey`] order.
    fn read_row(&self, row: &[u8]) -> LatticeResult<Vec<DataCell>>;

    /// Writes cells, overwriting any cell at identical coordinates.
    fn write_cells(&self, cells: Vec<DataCell>) -> LatticeResult<()>;

    /// Reads every cell of every row in `[start, end]`, inclusive,
    /// in [`CellKey`] order.
    fn scan(&self, start: &[u8], end: &[u8]) -> LatticeResult<Vec<DataCell>>;

    /// Replaces `row`'s entire cell set with `cells`.
    fn replace_row(&self, row: &[u8], cells: Vec<DataCell>) -> LatticeResult<()>;

    /// Returns true if `row` falls inside this partition's key range.
    fn row_in_range(&self, row: &[u8]) -> bool;
}

impl<P: Partition + ?Sized> Partition for std::sync::Arc<P> {
    fn table_id(&self) -> TableId {
        (**self).table_id()
    }

    fn read_row(&self, row: &[u8]) -> LatticeResult<Vec<DataCell>> {
        (**self).read_row(row)
    }

    fn write_cells(&self, cells: Vec<DataCell>) -> LatticeResult<()> {
        (**self).write_cells(cells)
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> LatticeResult<Vec<DataCell>> {
        (**self).scan(start, end)
    }

    fn replace_row(&self, row: &[u8], cells: Vec<DataCell>) -> LatticeResult<()> {
        (**self).replace_row(row, cells)
    }

    fn row_in_range(&self, row: &[u8]) -> bool {
        (**self).row_in_range(row)
    }
}

/// In-memory [`Partition`] over a sorted cell map.
#[derive(Debug, Default)]
pub struct MemPartition {
    table_id: TableId,
    range: Option<(Bytes, Bytes)>,
    cells: RwLock<BTreeMap<CellKey, (CellKind, Bytes)>>,
    unavailable: AtomicBool,
}

impl MemPartition {
    /// Creates an unbounded partition of `table_id`.
    #[must_use]
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            range: None,
            cells: RwLock::new(BTreeMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Creates a partition covering `[start, end)`; an empty `end`
    /// means unbounded above.
    #[must_use]
    pub fn with_range(table_id: TableId, start: Bytes, end: Bytes) -> Self {
        Self {
            range: Some((start, end)),
            ..Self::new(table_id)
        }
    }

    /// Toggles simulated unavailability; while set, every operation
    /// fails with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Total stored cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cells.read().len()
    }

    fn check_available(&self) -> LatticeResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(LatticeError::unavailable("partition offline"));
        }
        Ok(())
    }
}

fn to_cell(key: &CellKey, kind: CellKind, value: &Bytes) -> DataCell {
    DataCell {
        row: key.row.clone(),
        kind,
        qualifier: key.qualifier,
        version: key.version(),
        value: value.clone(),
    }
}

impl Partition for MemPartition {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn read_row(&self, row: &[u8]) -> LatticeResult<Vec<DataCell>> {
        self.check_available()?;
        let cells = self.cells.read();
        Ok(cells
            .range(CellKey::row_start(row)..=CellKey::row_end(row))
            .map(|(key, (kind, value))| to_cell(key, *kind, value))
            .collect())
    }

    fn write_cells(&self, cells: Vec<DataCell>) -> LatticeResult<()> {
        self.check_available()?;
        let mut map = self.cells.write();
        for cell in cells {
            map.insert(CellKey::of(&cell), (cell.kind, cell.value));
        }
        Ok(())
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> LatticeResult<Vec<DataCell>> {
        self.check_available()?;
        if start > end {
            return Ok(Vec::new());
        }
        let cells = self.cells.read();
        Ok(cells
            .range(CellKey::row_start(start)..=CellKey::row_end(end))
            .map(|(key, (kind, value))| to_cell(key, *kind, value))
            .collect())
    }

    fn replace_row(&self, row: &[u8], cells: Vec<DataCell>) -> LatticeResult<()> {
        self.check_available()?;
        let mut map = self.cells.write();
        let stale: Vec<CellKey> = map
            .range(CellKey::row_start(row)..=CellKey::row_end(row))
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            map.remove(&key);
        }
        for cell in cells {
            map.insert(CellKey::of(&cell), (cell.kind, cell.value));
        }
        Ok(())
    }

    fn row_in_range(&self, row: &[u8]) -> bool {
        match &self.range {
            None => true,
            Some((start, end)) => {
                row >= start.as_ref() && (end.is_empty() || row < end.as_ref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &'static [u8]) -> Bytes {
        Bytes::from_static(key)
    }

    #[test]
    fn test_row_cells_sort_bookkeeping_first_newest_first() {
        let partition = MemPartition::new(TableId::new(1));
        partition
            .write_cells(vec![
                DataCell::user(row(b"a"), TxnId::new(3), row(b"v3")),
                DataCell::user(row(b"a"), TxnId::new(8), row(b"v8")),
                DataCell::tombstone(row(b"a"), TxnId::new(5)),
                DataCell::commit_timestamp(row(b"a"), TxnId::new(3), TxnId::new(4)),
            ])
            .unwrap();

        let cells = partition.read_row(b"a").unwrap();
        assert_eq!(cells.len(), 4);
        assert_eq!(cells[0].kind, CellKind::CommitTimestamp);
        assert_eq!(cells[1].kind, CellKind::Tombstone);
        assert_eq!(cells[2].kind, CellKind::UserData);
        assert_eq!(cells[2].version, TxnId::new(8));
        assert_eq!(cells[3].version, TxnId::new(3));
    }

    #[test]
    fn test_same_coordinates_overwrite() {
        let partition = MemPartition::new(TableId::new(1));
        partition
            .write_cells(vec![DataCell::tombstone(row(b"a"), TxnId::new(5))])
            .unwrap();
        partition
            .write_cells(vec![DataCell::anti_tombstone(row(b"a"), TxnId::new(5))])
            .unwrap();

        let cells = partition.read_row(b"a").unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].kind, CellKind::AntiTombstone);
    }

    #[test]
    fn test_scan_is_inclusive_and_row_ordered() {
        let partition = MemPartition::new(TableId::new(1));
        partition
            .write_cells(vec![
                DataCell::user(row(b"a"), TxnId::new(1), row(b"va")),
                DataCell::user(row(b"b"), TxnId::new(1), row(b"vb")),
                DataCell::user(row(b"c"), TxnId::new(1), row(b"vc")),
            ])
            .unwrap();

        let cells = partition.scan(b"a", b"b").unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].row, row(b"a"));
        assert_eq!(cells[1].row, row(b"b"));

        assert!(partition.scan(b"x", b"a").unwrap().is_empty());
    }

    #[test]
    fn test_replace_row_drops_stale_versions() {
        let partition = MemPartition::new(TableId::new(1));
        partition
            .write_cells(vec![
                DataCell::user(row(b"a"), TxnId::new(1), row(b"v1")),
                DataCell::user(row(b"a"), TxnId::new(2), row(b"v2")),
                DataCell::user(row(b"b"), TxnId::new(1), row(b"vb")),
            ])
            .unwrap();

        partition
            .replace_row(b"a", vec![DataCell::user(row(b"a"), TxnId::new(2), row(b"v2"))])
            .unwrap();

        assert_eq!(partition.read_row(b"a").unwrap().len(), 1);
        // Other rows are untouched.
        assert_eq!(partition.read_row(b"b").unwrap().len(), 1);
    }

    #[test]
    fn test_row_in_range() {
        let bounded = MemPartition::with_range(TableId::new(1), row(b"b"), row(b"d"));
        assert!(!bounded.row_in_range(b"a"));
        assert!(bounded.row_in_range(b"b"));
        assert!(bounded.row_in_range(b"c"));
        assert!(!bounded.row_in_range(b"d"));

        let open_ended = MemPartition::with_range(TableId::new(1), row(b"b"), Bytes::new());
        assert!(open_ended.row_in_range(b"zzz"));
    }

    #[test]
    fn test_unavailable_surfaces_storage_error() {
        let partition = MemPartition::new(TableId::new(1));
        partition.set_unavailable(true);
        assert!(matches!(
            partition.read_row(b"a"),
            Err(LatticeError::StorageUnavailable { .. })
        ));
    }
}
