//! Read-through view cache over any transaction store.

use std::sync::Arc;
use std::time::Duration;

use lattice_cache::{CacheStats, SyncTtlCache};
use lattice_common::{LatticeResult, TableId, TxnId, TxnState};

use crate::config::TxnConfig;
use crate::txn::{TxnRecord, TxnView};

use super::{TxnStore, TxnSupplier};

/// Caching [`TxnStore`] decorator; the supplier hot paths are given.
///
/// Transaction lookups dominate read traffic, so views are cached by
/// id. A view whose chain outcome is settled can never change and is
/// cached without expiry; anything still in flight is served for at
/// most the configured TTL before the next lookup revalidates it
/// against the store. State transitions applied through this layer
/// invalidate the transitioned id immediately; views of descendants
/// embed the old state and age out via the TTL instead.
pub struct CachedTxnStore<S> {
    inner: S,
    cache: SyncTtlCache<TxnId, Arc<TxnView>>,
    active_ttl: Duration,
}

impl<S: TxnStore> CachedTxnStore<S> {
    /// Creates a cache of `capacity` views in front of `inner`.
    pub fn new(inner: S, capacity: usize, active_ttl: Duration) -> Self {
        Self {
            inner,
            cache: SyncTtlCache::new(capacity),
            active_ttl,
        }
    }

    /// Creates the cache sized per `config`.
    pub fn from_config(inner: S, config: &TxnConfig) -> Self {
        Self::new(inner, config.txn_cache_capacity, config.active_txn_cache_ttl)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns cache hit and eviction counters.
    pub fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    fn cache_view(&self, view: &Arc<TxnView>) {
        let ttl = if view.chain_settled() {
            None
        } else {
            Some(self.active_ttl)
        };
        self.cache.insert(view.id(), Arc::clone(view), ttl);
    }
}

impl<S: TxnStore> TxnSupplier for CachedTxnStore<S> {
    fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
        if let Some(view) = self.cache.get(&id) {
            return Ok(view);
        }
        let view = self.inner.transaction(id)?;
        self.cache_view(&view);
        Ok(view)
    }

    fn transaction_if_cached(&self, id: TxnId) -> Option<Arc<TxnView>> {
        self.cache.get(&id)
    }

    fn invalidate(&self, id: TxnId) {
        self.cache.remove(&id);
        self.inner.invalidate(id);
    }
}

impl<S: TxnStore> TxnStore for CachedTxnStore<S> {
    fn record_transaction(&self, record: &TxnRecord) -> LatticeResult<()> {
        self.inner.record_transaction(record)?;
        self.invalidate(record.id);
        Ok(())
    }

    fn compare_and_set_state(
        &self,
        id: TxnId,
        expected: TxnState,
        new: TxnState,
        commit_ts: Option<TxnId>,
    ) -> LatticeResult<bool> {
        let swapped = self
            .inner
            .compare_and_set_state(id, expected, new, commit_ts)?;
        if swapped {
            self.invalidate(id);
        }
        Ok(swapped)
    }

    fn elevate(&self, id: TxnId, table: TableId) -> LatticeResult<()> {
        self.inner.elevate(id, table)?;
        self.invalidate(id);
        Ok(())
    }

    fn keep_alive(&self, id: TxnId) -> LatticeResult<bool> {
        // Heartbeats do not change anything a cached view exposes.
        self.inner.keep_alive(id)
    }

    fn active_transaction_ids(
        &self,
        as_of: &TxnView,
        table: Option<TableId>,
    ) -> LatticeResult<Vec<TxnId>> {
        self.inner.active_transaction_ids(as_of, table)
    }
}

impl<S> std::fmt::Debug for CachedTxnStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTxnStore")
            .field("active_ttl", &self.active_ttl)
            .finish()
    }
}
