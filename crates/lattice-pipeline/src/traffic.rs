//! Admission counters and budgets for the write pipeline.
//!
//! Every mutation claims admission here before it is dispatched to
//! storage and releases it once the outcome is known. Writes are
//! classified dependent (spanning logically linked tables, such as a
//! base table and its index) or independent (single-table); each class
//! has a thread budget and an in-flight row budget. A class's two
//! counters live packed in one `AtomicU64` (threads in the high 32
//! bits, rows in the low 32), so claiming a slot and its rows is a
//! single compare-and-swap.
//!
//! Stealing is one-directional: an independent write that finds its
//! own budgets exhausted retries against the dependent budgets, but a
//! dependent write never borrows independent capacity. The admission
//! actually granted decides which pool the release must return to;
//! [`WriteAdmission`] reports it and [`WritePermit`] automates the
//! release.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use lattice_common::{
    LatticeError, LatticeResult, DEFAULT_MAX_DEPENDENT_WRITE_COUNT,
    DEFAULT_MAX_DEPENDENT_WRITE_THREADS, DEFAULT_MAX_INDEPENDENT_WRITE_COUNT,
    DEFAULT_MAX_INDEPENDENT_WRITE_THREADS,
};

const fn pack(threads: u32, rows: u32) -> u64 {
    ((threads as u64) << 32) | rows as u64
}

#[allow(clippy::cast_possible_truncation)]
const fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAdmission {
    /// Admitted against the dependent budgets.
    Dependent,
    /// Admitted against the independent budgets.
    Independent,
    /// Every applicable budget is exhausted.
    Rejected,
}

/// Point-in-time snapshot of the in-flight write load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStatus {
    /// Threads holding a dependent admission.
    pub dependent_write_threads: u32,
    /// Rows in flight under dependent admissions.
    pub dependent_write_count: u32,
    /// Threads holding an independent admission.
    pub independent_write_threads: u32,
    /// Rows in flight under independent admissions.
    pub independent_write_count: u32,
}

/// Budget maxima for [`WriteControl`].
///
/// Mutable at runtime through the control's setters; admission reads
/// the current limits without synchronization, so an in-flight attempt
/// may observe the values from just before an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteControlLimits {
    /// Maximum threads holding a dependent admission.
    pub max_dependent_write_threads: u32,
    /// Maximum threads holding an independent admission.
    pub max_independent_write_threads: u32,
    /// Maximum rows in flight under dependent admissions.
    pub max_dependent_write_count: u32,
    /// Maximum rows in flight under independent admissions.
    pub max_independent_write_count: u32,
}

impl Default for WriteControlLimits {
    fn default() -> Self {
        Self {
            max_dependent_write_threads: DEFAULT_MAX_DEPENDENT_WRITE_THREADS,
            max_independent_write_threads: DEFAULT_MAX_INDEPENDENT_WRITE_THREADS,
            max_dependent_write_count: DEFAULT_MAX_DEPENDENT_WRITE_COUNT,
            max_independent_write_count: DEFAULT_MAX_INDEPENDENT_WRITE_COUNT,
        }
    }
}

impl WriteControlLimits {
    /// Small budgets for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_dependent_write_threads: 4,
            max_independent_write_threads: 2,
            max_dependent_write_count: 16,
            max_independent_write_count: 8,
        }
    }

    /// Validates that every budget admits at least one write.
    pub fn validate(&self) -> LatticeResult<()> {
        if self.max_dependent_write_threads == 0
            || self.max_independent_write_threads == 0
            || self.max_dependent_write_count == 0
            || self.max_independent_write_count == 0
        {
            return Err(LatticeError::InvalidConfig {
                message: "write control limits must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Lock-free admission gate over shared write budgets.
///
/// Purely a gate: it never performs the write. Whoever increments must
/// decrement on every exit path, or the leaked budget is gone for the
/// life of the process; prefer [`WriteControl::try_acquire_dependent`]
/// and [`WriteControl::try_acquire_independent`], which release on
/// drop.
pub struct WriteControl {
    dependent: AtomicU64,
    independent: AtomicU64,
    limits: ArcSwap<WriteControlLimits>,
}

impl WriteControl {
    /// Creates a control with the given budget maxima.
    #[must_use]
    pub fn new(limits: WriteControlLimits) -> Self {
        Self {
            dependent: AtomicU64::new(0),
            independent: AtomicU64::new(0),
            limits: ArcSwap::from_pointee(limits),
        }
    }

    /// Returns the current budget maxima.
    #[must_use]
    pub fn limits(&self) -> WriteControlLimits {
        **self.limits.load()
    }

    /// Claims a dependent admission for `rows` rows.
    pub fn perform_dependent_write(&self, rows: u32) -> WriteAdmission {
        let limits = self.limits.load();
        loop {
            let current = self.dependent.load(AtomicOrdering::Acquire);
            let (threads, count) = unpack(current);
            let new_threads = threads.saturating_add(1);
            let new_count = count.saturating_add(rows);
            if new_threads > limits.max_dependent_write_threads
                || new_count > limits.max_dependent_write_count
            {
                tracing::trace!(
                    rows,
                    threads,
                    count,
                    "dependent write rejected, budget exhausted"
                );
                return WriteAdmission::Rejected;
            }
            if self
                .dependent
                .compare_exchange(
                    current,
                    pack(new_threads, new_count),
                    AtomicOrdering::AcqRel,
                    AtomicOrdering::Acquire,
                )
                .is_ok()
            {
                return WriteAdmission::Dependent;
            }
        }
    }

    /// Claims an independent admission for `rows` rows, falling back
    /// to the dependent budgets when the independent ones are
    /// exhausted.
    pub fn perform_independent_write(&self, rows: u32) -> WriteAdmission {
        let limits = self.limits.load();
        loop {
            let current = self.independent.load(AtomicOrdering::Acquire);
            let (threads, count) = unpack(current);
            let new_threads = threads.saturating_add(1);
            let new_count = count.saturating_add(rows);
            if new_threads > limits.max_independent_write_threads
                || new_count > limits.max_independent_write_count
            {
                tracing::trace!(
                    rows,
                    threads,
                    count,
                    "independent budget exhausted, stealing dependent headroom"
                );
                // The caller must then release as dependent.
                return self.perform_dependent_write(rows);
            }
            if self
                .independent
                .compare_exchange(
                    current,
                    pack(new_threads, new_count),
                    AtomicOrdering::AcqRel,
                    AtomicOrdering::Acquire,
                )
                .is_ok()
            {
                return WriteAdmission::Independent;
            }
        }
    }

    /// Releases a dependent admission of `rows` rows.
    pub fn finish_dependent_write(&self, rows: u32) {
        loop {
            let current = self.dependent.load(AtomicOrdering::Acquire);
            let (threads, count) = unpack(current);
            let next = pack(threads.saturating_sub(1), count.saturating_sub(rows));
            if self
                .dependent
                .compare_exchange(current, next, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Releases an independent admission of `rows` rows.
    pub fn finish_independent_write(&self, rows: u32) {
        loop {
            let current = self.independent.load(AtomicOrdering::Acquire);
            let (threads, count) = unpack(current);
            let next = pack(threads.saturating_sub(1), count.saturating_sub(rows));
            if self
                .independent
                .compare_exchange(current, next, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Claims a dependent admission released automatically on drop.
    pub fn try_acquire_dependent(&self, rows: u32) -> Option<WritePermit<'_>> {
        match self.perform_dependent_write(rows) {
            WriteAdmission::Rejected => None,
            admission => Some(WritePermit {
                control: self,
                admission,
                rows,
            }),
        }
    }

    /// Claims an independent admission released automatically on drop.
    ///
    /// The returned permit may carry [`WriteAdmission::Dependent`]
    /// when the admission stole dependent headroom; it releases into
    /// the pool it was granted from.
    pub fn try_acquire_independent(&self, rows: u32) -> Option<WritePermit<'_>> {
        match self.perform_independent_write(rows) {
            WriteAdmission::Rejected => None,
            admission => Some(WritePermit {
                control: self,
                admission,
                rows,
            }),
        }
    }

    /// Snapshots the in-flight write load.
    ///
    /// The two pools are read separately, so a snapshot taken under
    /// concurrent admissions can be transiently inconsistent between
    /// them.
    #[must_use]
    pub fn write_status(&self) -> WriteStatus {
        let (dependent_threads, dependent_count) =
            unpack(self.dependent.load(AtomicOrdering::Acquire));
        let (independent_threads, independent_count) =
            unpack(self.independent.load(AtomicOrdering::Acquire));
        WriteStatus {
            dependent_write_threads: dependent_threads,
            dependent_write_count: dependent_count,
            independent_write_threads: independent_threads,
            independent_write_count: independent_count,
        }
    }

    /// Updates the dependent thread budget for subsequent admissions.
    pub fn set_max_dependent_write_threads(&self, threads: u32) {
        self.limits.rcu(|limits| WriteControlLimits {
            max_dependent_write_threads: threads,
            ..**limits
        });
    }

    /// Updates the independent thread budget for subsequent admissions.
    pub fn set_max_independent_write_threads(&self, threads: u32) {
        self.limits.rcu(|limits| WriteControlLimits {
            max_independent_write_threads: threads,
            ..**limits
        });
    }

    /// Updates the dependent row budget for subsequent admissions.
    pub fn set_max_dependent_write_count(&self, rows: u32) {
        self.limits.rcu(|limits| WriteControlLimits {
            max_dependent_write_count: rows,
            ..**limits
        });
    }

    /// Updates the independent row budget for subsequent admissions.
    pub fn set_max_independent_write_count(&self, rows: u32) {
        self.limits.rcu(|limits| WriteControlLimits {
            max_independent_write_count: rows,
            ..**limits
        });
    }
}

impl Default for WriteControl {
    fn default() -> Self {
        Self::new(WriteControlLimits::default())
    }
}

impl std::fmt::Debug for WriteControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteControl")
            .field("status", &self.write_status())
            .field("limits", &self.limits())
            .finish()
    }
}

/// An admission that releases itself when dropped.
#[must_use = "dropping the permit releases the admission immediately"]
pub struct WritePermit<'a> {
    control: &'a WriteControl,
    admission: WriteAdmission,
    rows: u32,
}

impl WritePermit<'_> {
    /// The pool this admission was granted from.
    #[must_use]
    pub fn admission(&self) -> WriteAdmission {
        self.admission
    }

    /// Rows covered by this admission.
    #[must_use]
    pub fn rows(&self) -> u32 {
        self.rows
    }
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        match self.admission {
            WriteAdmission::Dependent => self.control.finish_dependent_write(self.rows),
            WriteAdmission::Independent => self.control.finish_independent_write(self.rows),
            // Permits are never issued for rejected admissions.
            WriteAdmission::Rejected => {}
        }
    }
}

impl std::fmt::Debug for WritePermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePermit")
            .field("admission", &self.admission)
            .field("rows", &self.rows)
            .finish()
    }
}
