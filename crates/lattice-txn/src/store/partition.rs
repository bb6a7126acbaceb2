//! The key-value seam the transaction table lives behind.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use bytes::Bytes;
use parking_lot::RwLock;

use lattice_common::{LatticeError, LatticeResult};

/// One transaction row: qualifier to cell value.
pub type TxnRow = BTreeMap<u16, Bytes>;

/// Minimal key-value surface required to host the transaction table.
///
/// Implementations must make `compare_and_swap_cell` atomic with respect
/// to every other mutation of the same row; the store's correctness
/// under concurrent commit and rollback rests on that.
pub trait TxnPartition: Send + Sync {
    /// Reads a whole row, `None` when absent.
    fn read_row(&self, key: &[u8]) -> LatticeResult<Option<TxnRow>>;

    /// Upserts the given cells into a row.
    fn write_row(&self, key: &[u8], cells: Vec<(u16, Bytes)>) -> LatticeResult<()>;

    /// Atomically replaces one cell if its current value matches
    /// `expected` (`None` means the cell must be absent). Returns false
    /// on mismatch.
    fn compare_and_swap_cell(
        &self,
        key: &[u8],
        qualifier: u16,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> LatticeResult<bool>;

    /// Rows in `[start, end]` inclusive, in key order.
    fn scan_range(&self, start: &[u8], end: &[u8]) -> LatticeResult<Vec<(Bytes, TxnRow)>>;
}

impl<P: TxnPartition + ?Sized> TxnPartition for std::sync::Arc<P> {
    fn read_row(&self, key: &[u8]) -> LatticeResult<Option<TxnRow>> {
        (**self).read_row(key)
    }

    fn write_row(&self, key: &[u8], cells: Vec<(u16, Bytes)>) -> LatticeResult<()> {
        (**self).write_row(key, cells)
    }

    fn compare_and_swap_cell(
        &self,
        key: &[u8],
        qualifier: u16,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> LatticeResult<bool> {
        (**self).compare_and_swap_cell(key, qualifier, expected, new)
    }

    fn scan_range(&self, start: &[u8], end: &[u8]) -> LatticeResult<Vec<(Bytes, TxnRow)>> {
        (**self).scan_range(start, end)
    }
}

/// In-memory [`TxnPartition`] with fault injection for tests.
#[derive(Debug, Default)]
pub struct MemTxnPartition {
    rows: RwLock<BTreeMap<Bytes, TxnRow>>,
    unavailable: AtomicBool,
}

impl MemTxnPartition {
    /// Creates an empty partition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles simulated unavailability; while set, every operation
    /// fails with `StorageUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Number of rows currently stored.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    fn check_available(&self) -> LatticeResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(LatticeError::unavailable("transaction partition unavailable"));
        }
        Ok(())
    }
}

impl TxnPartition for MemTxnPartition {
    fn read_row(&self, key: &[u8]) -> LatticeResult<Option<TxnRow>> {
        self.check_available()?;
        Ok(self.rows.read().get(key).cloned())
    }

    fn write_row(&self, key: &[u8], cells: Vec<(u16, Bytes)>) -> LatticeResult<()> {
        self.check_available()?;
        let mut rows = self.rows.write();
        let row = rows.entry(Bytes::copy_from_slice(key)).or_default();
        for (qualifier, value) in cells {
            row.insert(qualifier, value);
        }
        Ok(())
    }

    fn compare_and_swap_cell(
        &self,
        key: &[u8],
        qualifier: u16,
        expected: Option<&[u8]>,
        new: Bytes,
    ) -> LatticeResult<bool> {
        self.check_available()?;
        let mut rows = self.rows.write();
        let row = rows.entry(Bytes::copy_from_slice(key)).or_default();
        let current = row.get(&qualifier).map(Bytes::as_ref);
        if current != expected {
            return Ok(false);
        }
        row.insert(qualifier, new);
        Ok(true)
    }

    fn scan_range(&self, start: &[u8], end: &[u8]) -> LatticeResult<Vec<(Bytes, TxnRow)>> {
        self.check_available()?;
        let rows = self.rows.read();
        Ok(rows
            .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect())
    }
}
