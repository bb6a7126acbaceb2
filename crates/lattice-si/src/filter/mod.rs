//! Per-scan visibility filters.
//!
//! A filter is built per reader transaction and driven over a row's
//! cells in storage order: commit timestamps first, then deletion
//! markers, then user data, newest version first. That order lets the
//! filter learn each writer's persisted outcome and the row's deletion
//! history before judging the data those govern.
//!
//! The driver contract, for both variants:
//! - feed cells of one row in order, honoring seek verdicts;
//! - at each row boundary, consult [`TxnFilter::exclude_row`] and then
//!   call [`TxnFilter::next_row`];
//! - for the packed variant, take the row's merged output from
//!   [`PackedTxnFilter::produce_accumulated_cell`] instead of the raw
//!   cells.

mod packed;
mod simple;

pub use packed::PackedTxnFilter;
pub use simple::SimpleTxnFilter;

use lattice_common::LatticeResult;

use crate::data::DataCell;

/// Verdict for one candidate cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    /// The cell is visible; emit it.
    Include,
    /// The cell is visible and completes the row; emit and move on.
    IncludeAndSeekNextRow,
    /// The cell is not visible; keep scanning the row.
    Skip,
    /// Nothing further in this row can be visible; move on.
    SeekNextRow,
    /// Drop the entire row, including cells already emitted.
    FilterRow,
}

/// Accumulation progress of a packed filter within one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    /// No visible packed data seen yet.
    ScanningRow,
    /// Visible columns accumulated; more versions may contribute.
    Accumulating,
    /// The row's output is complete; further cells are redundant.
    RowDone,
}

/// A per-scan, per-reader visibility filter.
pub trait TxnFilter {
    /// Classifies one candidate cell.
    fn filter_cell(&mut self, cell: &DataCell) -> LatticeResult<ReturnCode>;

    /// Resets per-row state at a row boundary.
    fn next_row(&mut self);

    /// True if the just-scanned row had no visible version at all.
    fn exclude_row(&self) -> bool;
}
