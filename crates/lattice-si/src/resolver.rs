//! Roll-forward of settled transaction outcomes onto their rows.
//!
//! Scans that had to chase a writer's state through the transaction
//! store hand the settled outcome here, so the next scan of the row
//! finds a commit-timestamp cell and skips the store entirely.
//! Resolution is advisory: losing a request costs a future lookup,
//! never correctness, so the async resolver prefers dropping work to
//! blocking a scan.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lattice_common::{
    LatticeError, LatticeResult, TxnId, DEFAULT_RESOLVER_DRAIN_BATCH, DEFAULT_RESOLVER_QUEUE_DEPTH,
};

use crate::data::{DataCell, TxnResolution};
use crate::partition::Partition;

/// Sink for settled writer outcomes discovered during scans.
pub trait ReadResolver: Send + Sync {
    /// Requests that `outcome` be persisted on `row` for the version
    /// written by `txn_id`. Fire-and-forget.
    fn resolve(&self, row: Bytes, txn_id: TxnId, outcome: TxnResolution);
}

impl<R: ReadResolver + ?Sized> ReadResolver for Arc<R> {
    fn resolve(&self, row: Bytes, txn_id: TxnId, outcome: TxnResolution) {
        (**self).resolve(row, txn_id, outcome);
    }
}

/// Discards every resolution request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReadResolver;

impl ReadResolver for NoopReadResolver {
    fn resolve(&self, _row: Bytes, _txn_id: TxnId, _outcome: TxnResolution) {}
}

/// Writes each outcome to the partition on the caller's thread.
///
/// Suitable for tests and for embedded setups without a runtime; scans
/// under load want [`AsyncReadResolver`] instead.
#[derive(Debug)]
pub struct DirectReadResolver<P> {
    partition: P,
}

impl<P: Partition> DirectReadResolver<P> {
    /// Creates a resolver writing directly to `partition`.
    pub fn new(partition: P) -> Self {
        Self { partition }
    }
}

impl<P: Partition> ReadResolver for DirectReadResolver<P> {
    fn resolve(&self, row: Bytes, txn_id: TxnId, outcome: TxnResolution) {
        if let Err(error) = self.partition.write_cells(vec![outcome_cell(row, txn_id, outcome)]) {
            tracing::debug!(%txn_id, %error, "dropping roll-forward");
        }
    }
}

/// Configuration for [`AsyncReadResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Capacity of the pending-resolution queue.
    pub queue_depth: usize,
    /// Most resolutions written per partition round trip.
    pub drain_batch: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_RESOLVER_QUEUE_DEPTH,
            drain_batch: DEFAULT_RESOLVER_DRAIN_BATCH,
        }
    }
}

impl ResolverConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration small enough for tests to fill the queue.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            queue_depth: 4,
            drain_batch: 2,
        }
    }

    /// Sets the queue depth.
    #[must_use]
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Sets the drain batch size.
    #[must_use]
    pub fn with_drain_batch(mut self, batch: usize) -> Self {
        self.drain_batch = batch;
        self
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> LatticeResult<()> {
        if self.queue_depth == 0 {
            return Err(LatticeError::InvalidConfig {
                message: "queue_depth must be non-zero".to_string(),
            });
        }
        if self.drain_batch == 0 {
            return Err(LatticeError::InvalidConfig {
                message: "drain_batch must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Counters for the async resolver.
#[derive(Debug, Default)]
pub struct ResolverStats {
    /// Outcomes written to the partition.
    resolved: AtomicU64,
    /// Requests already in flight for the same row and writer.
    coalesced: AtomicU64,
    /// Requests dropped because the queue was full.
    dropped: AtomicU64,
    /// Partition round trips.
    batches: AtomicU64,
}

impl ResolverStats {
    /// Records `count` persisted outcomes.
    #[inline]
    fn add_resolved(&self, count: u64) {
        self.resolved.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a request coalesced with one already in flight.
    #[inline]
    fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request dropped on a full queue.
    #[inline]
    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one partition round trip.
    #[inline]
    fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of persisted outcomes.
    pub fn resolved(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    /// Returns the number of coalesced requests.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Returns the number of dropped requests.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of partition round trips.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }
}

struct Resolution {
    row: Bytes,
    txn_id: TxnId,
    outcome: TxnResolution,
}

/// Queue-backed resolver that batches roll-forwards off the scan path.
///
/// Requests flow through a bounded queue to one worker task; duplicate
/// requests for a row and writer already in flight are coalesced, and
/// a full queue drops the request rather than stall the scan.
#[derive(Debug)]
pub struct AsyncReadResolver {
    tx: mpsc::Sender<Resolution>,
    inflight: Arc<DashMap<(Bytes, TxnId), ()>>,
    stats: Arc<ResolverStats>,
    handle: JoinHandle<()>,
}

impl AsyncReadResolver {
    /// Spawns the worker task on the current runtime.
    pub fn start<P: Partition + 'static>(
        partition: P,
        config: &ResolverConfig,
    ) -> LatticeResult<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_depth);
        let inflight: Arc<DashMap<(Bytes, TxnId), ()>> = Arc::new(DashMap::new());
        let stats = Arc::new(ResolverStats::default());
        let handle = tokio::spawn(drain_loop(
            rx,
            partition,
            Arc::clone(&inflight),
            Arc::clone(&stats),
            config.drain_batch,
        ));
        Ok(Self {
            tx,
            inflight,
            stats,
            handle,
        })
    }

    /// Returns the resolver's counters.
    #[must_use]
    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    /// Stops accepting requests, drains the queue, and waits for the
    /// worker to exit.
    pub async fn shutdown(self) {
        drop(self.tx);
        // The worker exits once the queue drains.
        let _ = self.handle.await;
    }
}

impl ReadResolver for AsyncReadResolver {
    fn resolve(&self, row: Bytes, txn_id: TxnId, outcome: TxnResolution) {
        let key = (row.clone(), txn_id);
        if self.inflight.insert(key.clone(), ()).is_some() {
            self.stats.record_coalesced();
            return;
        }
        if let Err(error) = self.tx.try_send(Resolution { row, txn_id, outcome }) {
            self.inflight.remove(&key);
            self.stats.record_dropped();
            tracing::trace!(%txn_id, %error, "resolution queue full, dropping request");
        }
    }
}

async fn drain_loop<P: Partition>(
    mut rx: mpsc::Receiver<Resolution>,
    partition: P,
    inflight: Arc<DashMap<(Bytes, TxnId), ()>>,
    stats: Arc<ResolverStats>,
    drain_batch: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while batch.len() < drain_batch {
            match rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }
        let cells = batch
            .iter()
            .map(|r| outcome_cell(r.row.clone(), r.txn_id, r.outcome))
            .collect();
        match partition.write_cells(cells) {
            Ok(()) => stats.add_resolved(batch.len() as u64),
            Err(error) => {
                tracing::debug!(count = batch.len(), %error, "dropping roll-forward batch");
            }
        }
        stats.record_batch();
        for request in &batch {
            inflight.remove(&(request.row.clone(), request.txn_id));
        }
    }
}

fn outcome_cell(row: Bytes, txn_id: TxnId, outcome: TxnResolution) -> DataCell {
    match outcome {
        TxnResolution::Committed(ts) => DataCell::commit_timestamp(row, txn_id, ts),
        TxnResolution::RolledBack => DataCell::rolled_back_marker(row, txn_id),
    }
}
