//! Block-allocating timestamp oracle.
//!
//! Transaction ids and commit timestamps come from one strictly
//! increasing sequence. To avoid a durable write per id, the oracle
//! reserves ids in blocks: it persists a new high-water mark through a
//! [`SequencePersistor`] before handing out any id below it. After a
//! crash the sequence resumes at the persisted mark, so ids in the
//! unconsumed tail of a block are burned rather than ever reissued.
//!
//! The oracle also tracks a durable low-water mark, the minimum begin
//! timestamp that can still belong to an unresolved transaction. Active
//! transaction scans use it to bound how far back they must look.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;

use lattice_common::{LatticeError, LatticeResult, TxnId, MIN_TIMESTAMP_BLOCK_SIZE};

/// Source of transaction ids and commit timestamps.
pub trait TimestampSource: Send + Sync {
    /// Returns the next id, strictly greater than any previously
    /// returned value, including across restarts.
    fn next_timestamp(&self) -> LatticeResult<TxnId>;

    /// Advances the durable low-water mark. Values at or below the
    /// current mark are ignored, so the mark only moves forward.
    fn remember_timestamp(&self, id: TxnId) -> LatticeResult<()>;

    /// Returns the current low-water mark.
    fn retrieve_timestamp(&self) -> TxnId;
}

/// Durable backing for the oracle's two marks.
pub trait SequencePersistor: Send + Sync {
    /// Persists the reservation high-water mark.
    fn persist_limit(&self, limit: u64) -> LatticeResult<()>;

    /// Loads the persisted high-water mark, zero if never written.
    fn load_limit(&self) -> LatticeResult<u64>;

    /// Persists the low-water mark.
    fn persist_watermark(&self, watermark: u64) -> LatticeResult<()>;

    /// Loads the persisted low-water mark, zero if never written.
    fn load_watermark(&self) -> LatticeResult<u64>;
}

impl<P: SequencePersistor + ?Sized> SequencePersistor for std::sync::Arc<P> {
    fn persist_limit(&self, limit: u64) -> LatticeResult<()> {
        (**self).persist_limit(limit)
    }

    fn load_limit(&self) -> LatticeResult<u64> {
        (**self).load_limit()
    }

    fn persist_watermark(&self, watermark: u64) -> LatticeResult<()> {
        (**self).persist_watermark(watermark)
    }

    fn load_watermark(&self) -> LatticeResult<u64> {
        (**self).load_watermark()
    }
}

/// A [`TimestampSource`] that amortizes durability over id blocks.
///
/// The fast path is a single `fetch_add`. Only the caller that crosses
/// the reserved limit takes the refill lock and pays for a durable
/// write; concurrent callers that also crossed wait on the same lock
/// and find the limit already advanced.
pub struct BlockTimestampOracle<S> {
    persistor: S,
    block_size: u64,
    /// Next id to hand out.
    next: AtomicU64,
    /// First id not covered by the persisted reservation.
    limit: AtomicU64,
    refill: Mutex<()>,
    watermark: AtomicU64,
}

impl<S: SequencePersistor> BlockTimestampOracle<S> {
    /// Creates an oracle resuming from the persistor's state.
    pub fn new(persistor: S, block_size: u64) -> LatticeResult<Self> {
        if block_size < MIN_TIMESTAMP_BLOCK_SIZE {
            return Err(LatticeError::InvalidConfig {
                message: format!(
                    "timestamp block size {block_size} below minimum {MIN_TIMESTAMP_BLOCK_SIZE}"
                ),
            });
        }
        let limit = persistor.load_limit()?;
        let watermark = persistor.load_watermark()?;
        Ok(Self {
            persistor,
            block_size,
            next: AtomicU64::new(limit.max(TxnId::MIN.as_u64())),
            limit: AtomicU64::new(limit),
            refill: Mutex::new(()),
            watermark: AtomicU64::new(watermark),
        })
    }

    /// Returns the persistor, mostly for test inspection.
    pub fn persistor(&self) -> &S {
        &self.persistor
    }

    fn refill_to(&self, id: u64) -> LatticeResult<()> {
        let _guard = self.refill.lock();
        if id < self.limit.load(AtomicOrdering::SeqCst) {
            // Another caller already reserved past us.
            return Ok(());
        }
        let new_limit = id
            .checked_add(self.block_size)
            .ok_or_else(|| LatticeError::internal("timestamp sequence exhausted"))?;
        // Persist before release: an id is only handed out once a
        // limit covering it is durable.
        self.persistor.persist_limit(new_limit)?;
        self.limit.store(new_limit, AtomicOrdering::SeqCst);
        tracing::debug!(new_limit, "reserved timestamp block");
        Ok(())
    }
}

impl<S: SequencePersistor> TimestampSource for BlockTimestampOracle<S> {
    fn next_timestamp(&self) -> LatticeResult<TxnId> {
        let id = self.next.fetch_add(1, AtomicOrdering::SeqCst);
        if id >= self.limit.load(AtomicOrdering::SeqCst) {
            self.refill_to(id)?;
        }
        Ok(TxnId::new(id))
    }

    fn remember_timestamp(&self, id: TxnId) -> LatticeResult<()> {
        let proposed = id.as_u64();
        if proposed <= self.watermark.load(AtomicOrdering::SeqCst) {
            return Ok(());
        }
        self.persistor.persist_watermark(proposed)?;
        self.watermark.fetch_max(proposed, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn retrieve_timestamp(&self) -> TxnId {
        TxnId::new(self.watermark.load(AtomicOrdering::SeqCst))
    }
}

impl<S> std::fmt::Debug for BlockTimestampOracle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockTimestampOracle")
            .field("next", &self.next.load(AtomicOrdering::Relaxed))
            .field("limit", &self.limit.load(AtomicOrdering::Relaxed))
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// In-memory [`SequencePersistor`] with fault injection for tests.
#[derive(Debug, Default)]
pub struct MemSequencePersistor {
    limit: AtomicU64,
    watermark: AtomicU64,
    unavailable: AtomicBool,
    limit_writes: AtomicU64,
}

impl MemSequencePersistor {
    /// Creates an empty persistor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggles simulated unavailability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    /// Number of limit writes accepted so far.
    #[must_use]
    pub fn limit_writes(&self) -> u64 {
        self.limit_writes.load(AtomicOrdering::SeqCst)
    }

    fn check_available(&self) -> LatticeResult<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(LatticeError::unavailable("sequence persistor unavailable"));
        }
        Ok(())
    }
}

impl SequencePersistor for MemSequencePersistor {
    fn persist_limit(&self, limit: u64) -> LatticeResult<()> {
        self.check_available()?;
        self.limit.store(limit, AtomicOrdering::SeqCst);
        self.limit_writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn load_limit(&self) -> LatticeResult<u64> {
        self.check_available()?;
        Ok(self.limit.load(AtomicOrdering::SeqCst))
    }

    fn persist_watermark(&self, watermark: u64) -> LatticeResult<()> {
        self.check_available()?;
        self.watermark.store(watermark, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn load_watermark(&self) -> LatticeResult<u64> {
        self.check_available()?;
        Ok(self.watermark.load(AtomicOrdering::SeqCst))
    }
}
