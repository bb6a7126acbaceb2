//! Visibility gating for in-flight schema changes.
//!
//! A DDL operation runs inside its own transaction. While it drains
//! and commits, writers started before it must keep seeing the old
//! schema and writers started after it must see the new one. The
//! [`DdlFilter`] answers that question per writer, caching decisions
//! so the hot write path does not hammer the transaction store.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lattice_cache::SyncTtlCache;
use lattice_common::{
    LatticeError, LatticeResult, TxnId, TxnState, DEFAULT_DDL_CACHE_CAPACITY,
    DEFAULT_DDL_CACHE_TTL_SECS,
};
use lattice_txn::{TxnSupplier, TxnView};

/// Configuration for [`DdlFilter`] decision caching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdlFilterConfig {
    /// Capacity of the per-filter decision cache.
    pub cache_capacity: usize,
    /// How long a decision computed while the DDL transaction was
    /// still in flight may be served before recomputing.
    pub cache_ttl: Duration,
}

impl Default for DdlFilterConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_DDL_CACHE_CAPACITY,
            cache_ttl: Duration::from_secs(DEFAULT_DDL_CACHE_TTL_SECS),
        }
    }
}

impl DdlFilterConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration with a TTL short enough for tests to outwait.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            cache_capacity: 64,
            cache_ttl: Duration::from_millis(20),
        }
    }

    /// Sets the decision cache capacity.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets the provisional-decision TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> LatticeResult<()> {
        if self.cache_capacity == 0 {
            return Err(LatticeError::InvalidConfig {
                message: "cache_capacity must be non-zero".to_string(),
            });
        }
        if self.cache_ttl.is_zero() {
            return Err(LatticeError::InvalidConfig {
                message: "cache_ttl must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// One cached answer, tagged with whether the DDL transaction had
/// settled when it was computed.
#[derive(Debug, Clone, Copy)]
struct DdlVisibility {
    visible: bool,
    origin_settled: bool,
}

/// Decides which transactions a committed DDL change applies to.
///
/// A change is visible to a transaction once the change's own
/// transaction (the origin) has effectively committed and the observer
/// began at or after the origin. Decisions reached while the origin
/// was still in flight are provisional: they are cached only for
/// `cache_ttl`, because the origin committing flips them. Decisions
/// reached after the origin settled are final and cached without
/// expiry.
pub struct DdlFilter {
    origin: Arc<TxnView>,
    supplier: Arc<dyn TxnSupplier>,
    cache: SyncTtlCache<TxnId, DdlVisibility>,
    ttl: Duration,
}

impl DdlFilter {
    /// Creates a filter for the schema change made by `origin`.
    pub fn new(
        origin: Arc<TxnView>,
        supplier: Arc<dyn TxnSupplier>,
        config: &DdlFilterConfig,
    ) -> Self {
        Self {
            origin,
            supplier,
            cache: SyncTtlCache::new(config.cache_capacity),
            ttl: config.cache_ttl,
        }
    }

    /// The transaction that made the schema change.
    #[must_use]
    pub fn origin(&self) -> &Arc<TxnView> {
        &self.origin
    }

    /// Returns true if the schema change applies to `other`.
    pub fn is_visible_by(&self, other: &TxnView) -> LatticeResult<bool> {
        if let Some(entry) = self.cache.get(&other.id()) {
            // Final once the origin settled; provisional entries age
            // out by TTL and get recomputed below.
            return Ok(entry.visible);
        }
        let origin = self.current_origin()?;
        let visible =
            origin.effective_state() == TxnState::Committed && other.id() >= origin.id();
        let origin_settled = origin.chain_settled();
        let ttl = if origin_settled { None } else { Some(self.ttl) };
        self.cache.insert(
            other.id(),
            DdlVisibility {
                visible,
                origin_settled,
            },
            ttl,
        );
        Ok(visible)
    }

    /// The origin's current view: the held one once settled, a fresh
    /// one from the store while it can still change.
    fn current_origin(&self) -> LatticeResult<Arc<TxnView>> {
        if self.origin.chain_settled() {
            return Ok(Arc::clone(&self.origin));
        }
        self.supplier.transaction(self.origin.id())
    }

    /// Filters apply in commit order, earliest change first.
    fn sort_key(&self) -> (TxnId, TxnId) {
        (
            self.origin.commit_timestamp().unwrap_or(TxnId::INVALID),
            self.origin.id(),
        )
    }
}

impl PartialEq for DdlFilter {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for DdlFilter {}

impl PartialOrd for DdlFilter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DdlFilter {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl std::fmt::Debug for DdlFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdlFilter")
            .field("origin", &self.origin.id())
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use lattice_common::{IsolationLevel, TableId};
    use lattice_txn::TxnRecord;
    use parking_lot::RwLock;

    #[derive(Default)]
    struct SwapSupplier(RwLock<HashMap<TxnId, Arc<TxnView>>>);

    impl SwapSupplier {
        fn set(&self, view: Arc<TxnView>) {
            self.0.write().insert(view.id(), view);
        }
    }

    impl TxnSupplier for SwapSupplier {
        fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
            self.0
                .read()
                .get(&id)
                .cloned()
                .ok_or(LatticeError::TransactionNotFound { txn_id: id })
        }

        fn transaction_if_cached(&self, id: TxnId) -> Option<Arc<TxnView>> {
            self.0.read().get(&id).cloned()
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

    fn reader(id: u64) -> Arc<TxnView> {
        Arc::new(TxnView::read_only(
            TxnId::new(id),
            IsolationLevel::SnapshotIsolation,
        ))
    }

    #[test]
    fn test_committed_change_splits_by_begin_timestamp() {
        let origin = txn(100, TxnState::Committed, Some(105));
        let supplier = Arc::new(SwapSupplier::default());
        let filter = DdlFilter::new(origin, supplier, &DdlFilterConfig::default());

        assert!(filter.is_visible_by(&reader(120)).unwrap());
        assert!(!filter.is_visible_by(&reader(90)).unwrap());
        // Settled decisions come from the cache from here on; the
        // supplier was never needed at all.
        assert!(filter.is_visible_by(&reader(120)).unwrap());
    }

    #[test]
    fn test_decision_recomputed_after_origin_commits() {
        let active = txn(100, TxnState::Active, None);
        let supplier = Arc::new(SwapSupplier::default());
        supplier.set(Arc::clone(&active));
        let filter = DdlFilter::new(
            active,
            Arc::clone(&supplier) as Arc<dyn TxnSupplier>,
            &DdlFilterConfig::for_testing(),
        );

        // In flight: nothing sees the change yet.
        assert!(!filter.is_visible_by(&reader(120)).unwrap());

        supplier.set(txn(100, TxnState::Committed, Some(105)));
        // The provisional answer holds until its TTL lapses.
        assert!(!filter.is_visible_by(&reader(120)).unwrap());
        std::thread::sleep(Duration::from_millis(30));
        assert!(filter.is_visible_by(&reader(120)).unwrap());
    }

    #[test]
    fn test_rolled_back_ancestor_hides_the_change() {
        let parent = txn(90, TxnState::RolledBack, None);
        let mut record = TxnRecord::new_active(
            TxnId::new(100),
            TxnId::new(90),
            IsolationLevel::SnapshotIsolation,
            false,
            Some(TableId::new(1)),
            0,
        );
        record.state = TxnState::Committed;
        record.commit_ts = TxnId::new(105);
        let origin = Arc::new(TxnView::new(&record, Some(parent)));

        let filter = DdlFilter::new(
            origin,
            Arc::new(SwapSupplier::default()),
            &DdlFilterConfig::default(),
        );
        assert!(!filter.is_visible_by(&reader(120)).unwrap());
    }

    #[test]
    fn test_filters_order_by_commit_timestamp() {
        let supplier: Arc<dyn TxnSupplier> = Arc::new(SwapSupplier::default());
        let config = DdlFilterConfig::default();
        let early = DdlFilter::new(
            txn(100, TxnState::Committed, Some(105)),
            Arc::clone(&supplier),
            &config,
        );
        let late = DdlFilter::new(
            txn(102, TxnState::Committed, Some(110)),
            Arc::clone(&supplier),
            &config,
        );
        let pending = DdlFilter::new(txn(104, TxnState::Active, None), supplier, &config);

        assert!(early < late);
        assert!(pending < early);
        assert_eq!(early.cmp(&early), Ordering::Equal);
    }

    #[test]
    fn test_config_validation() {
        assert!(DdlFilterConfig::default().validate().is_ok());
        assert!(DdlFilterConfig::for_testing().validate().is_ok());
        assert!(DdlFilterConfig::new()
            .with_cache_capacity(0)
            .validate()
            .is_err());
        assert!(DdlFilterConfig::new()
            .with_cache_ttl(Duration::ZERO)
            .validate()
            .is_err());
    }
}
