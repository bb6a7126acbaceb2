//! Durable transaction store over a [`TxnPartition`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lattice_common::{LatticeError, LatticeResult, TableId, TxnId, TxnState};

use crate::backoff::{run_with_retries, RetryPolicy};
use crate::config::TxnConfig;
use crate::oracle::TimestampSource;
use crate::txn::{TxnRecord, TxnView};

use super::codec;
use super::partition::TxnPartition;
use super::{TxnStore, TxnSupplier};

/// Wall-clock milliseconds since the epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// The durable [`TxnStore`] implementation.
///
/// Transactions are rows keyed by big-endian id, so an id-range scan of
/// the partition walks them in begin order. Every partition call is
/// wrapped in bounded retries; exhausted budgets surface
/// `StorageUnavailable` to the caller.
///
/// Writable transactions must heartbeat within the keep-alive window.
/// Ones that lapse are materialized as rolled back by every read, and a
/// commit attempt settles the lapse persistently instead of committing.
pub struct PartitionTxnStore<P> {
    partition: P,
    oracle: Arc<dyn TimestampSource>,
    retry: RetryPolicy,
    keep_alive_window: Duration,
}

impl<P: TxnPartition> PartitionTxnStore<P> {
    /// Creates a store over `partition`.
    pub fn new(partition: P, oracle: Arc<dyn TimestampSource>, config: &TxnConfig) -> Self {
        Self {
            partition,
            oracle,
            retry: config.retry.clone(),
            keep_alive_window: config.keep_alive_window,
        }
    }

    /// Returns the partition, mostly for test orchestration.
    pub fn partition(&self) -> &P {
        &self.partition
    }

    fn load_record(&self, id: TxnId) -> LatticeResult<Option<TxnRecord>> {
        let key = codec::encode_row_key(id);
        let row = run_with_retries(&self.retry, || self.partition.read_row(&key))?;
        row.map(|row| codec::decode_record(id, &row)).transpose()
    }

    fn require_record(&self, id: TxnId) -> LatticeResult<TxnRecord> {
        self.load_record(id)?
            .ok_or(LatticeError::TransactionNotFound { txn_id: id })
    }

    fn keep_alive_lapsed(&self, record: &TxnRecord) -> bool {
        record.state == TxnState::Active
            && record.is_writable()
            && now_millis().saturating_sub(record.last_keep_alive_ms)
                > self.keep_alive_window.as_millis() as u64
    }

    fn materialize(&self, mut record: TxnRecord, parent: Option<Arc<TxnView>>) -> TxnView {
        if self.keep_alive_lapsed(&record) {
            record.state = TxnState::RolledBack;
        }
        TxnView::new(&record, parent)
    }

    fn resolve_view(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
        let record = self.require_record(id)?;
        self.resolve_record(record)
    }

    fn resolve_record(&self, record: TxnRecord) -> LatticeResult<Arc<TxnView>> {
        // Parents always begin before their children; anything else is
        // a corrupt link and would loop.
        if record.parent_id.is_valid() && record.parent_id >= record.id {
            return Err(LatticeError::corruption(format!(
                "transaction {} has parent {} with a later begin timestamp",
                record.id, record.parent_id
            )));
        }
        let parent = if record.parent_id.is_valid() {
            Some(self.resolve_view(record.parent_id)?)
        } else {
            None
        };
        Ok(Arc::new(self.materialize(record, parent)))
    }

    /// Persistently rolls back a lapsed writer so no later read can
    /// disagree with the rollback this store already reported.
    fn settle_lapsed(&self, id: TxnId) -> LatticeResult<()> {
        let key = codec::encode_row_key(id);
        let expected = codec::encode_state(TxnState::Active, TxnId::INVALID);
        let replacement = codec::encode_state(TxnState::RolledBack, TxnId::INVALID);
        run_with_retries(&self.retry, || {
            self.partition
                .compare_and_swap_cell(&key, codec::Q_STATE, Some(&expected), replacement.clone())
        })?;
        Ok(())
    }
}

impl<P: TxnPartition> TxnSupplier for PartitionTxnStore<P> {
    fn transaction(&self, id: TxnId) -> LatticeResult<Arc<TxnView>> {
        self.resolve_view(id)
    }

    fn transaction_if_cached(&self, _id: TxnId) -> Option<Arc<TxnView>> {
        // No cache at this layer; see CachedTxnStore.
        None
    }

    fn invalidate(&self, _id: TxnId) {}
}

impl<P: TxnPartition> TxnStore for PartitionTxnStore<P> {
    fn record_transaction(&self, record: &TxnRecord) -> LatticeResult<()> {
        let key = codec::encode_row_key(record.id);
        let cells = codec::encode_record(record);
        run_with_retries(&self.retry, || {
            self.partition.write_row(&key, cells.clone())
        })?;
        tracing::debug!(txn_id = %record.id, parent_id = %record.parent_id, "recorded transaction");
        Ok(())
    }

    fn compare_and_set_state(
        &self,
        id: TxnId,
        expected: TxnState,
        new: TxnState,
        commit_ts: Option<TxnId>,
    ) -> LatticeResult<bool> {
        if new == TxnState::Committed {
            if let Some(record) = self.load_record(id)? {
                if self.keep_alive_lapsed(&record) {
                    self.settle_lapsed(id)?;
                    return Ok(false);
                }
            }
        }
        let key = codec::encode_row_key(id);
        // Only ACTIVE records transition, and ACTIVE never carries a
        // commit timestamp, so the expected cell is fully determined.
        let expected_cell = codec::encode_state(expected, TxnId::INVALID);
        let new_cell = codec::encode_state(new, commit_ts.unwrap_or(TxnId::INVALID));
        run_with_retries(&self.retry, || {
            self.partition
                .compare_and_swap_cell(&key, codec::Q_STATE, Some(&expected_cell), new_cell.clone())
        })
    }

    fn elevate(&self, id: TxnId, table: TableId) -> LatticeResult<()> {
        let key = codec::encode_row_key(id);
        loop {
            let record = self.require_record(id)?;
            if record.state != TxnState::Active {
                return Err(LatticeError::TransactionNotActive {
                    txn_id: id,
                    state: record.state,
                });
            }
            if record.destination_tables.contains(&table) {
                return Ok(());
            }
            let expected = codec::encode_tables(&record.destination_tables);
            let mut tables = record.destination_tables;
            tables.push(table);
            let swapped = run_with_retries(&self.retry, || {
                self.partition.compare_and_swap_cell(
                    &key,
                    codec::Q_TABLES,
                    Some(&expected),
                    codec::encode_tables(&tables),
                )
            })?;
            if swapped {
                tracing::debug!(txn_id = %id, table = %table, "elevated transaction");
                return Ok(());
            }
            // Lost a race against a concurrent elevation; re-read.
        }
    }

    fn keep_alive(&self, id: TxnId) -> LatticeResult<bool> {
        let record = self.require_record(id)?;
        if record.state != TxnState::Active || self.keep_alive_lapsed(&record) {
            return Ok(false);
        }
        let key = codec::encode_row_key(id);
        run_with_retries(&self.retry, || {
            self.partition.write_row(
                &key,
                vec![(codec::Q_KEEPALIVE, codec::encode_keep_alive(now_millis()))],
            )
        })?;
        Ok(true)
    }

    fn active_transaction_ids(
        &self,
        as_of: &TxnView,
        table: Option<TableId>,
    ) -> LatticeResult<Vec<TxnId>> {
        let floor = self
            .oracle
            .retrieve_timestamp()
            .as_u64()
            .max(TxnId::MIN.as_u64());
        if floor > as_of.id().as_u64() {
            return Ok(Vec::new());
        }
        let start = codec::encode_row_key(TxnId::new(floor));
        let end = codec::encode_row_key(as_of.id());
        let rows = run_with_retries(&self.retry, || self.partition.scan_range(&start, &end))?;

        let mut ids = Vec::new();
        for (key, row) in rows {
            let id = codec::decode_row_key(&key)?;
            let record = codec::decode_record(id, &row)?;
            if !record.is_writable() {
                continue;
            }
            if let Some(table) = table {
                if !record.destination_tables.contains(&table) {
                    continue;
                }
            }
            let view = self.resolve_record(record)?;
            if view.effective_state() == TxnState::Active {
                ids.push(id);
            }
        }
        // Scan order is key order, which is id order.
        Ok(ids)
    }
}

impl<P> std::fmt::Debug for PartitionTxnStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionTxnStore")
            .field("keep_alive_window", &self.keep_alive_window)
            .finish()
    }
}
