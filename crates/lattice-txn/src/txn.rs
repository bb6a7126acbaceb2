//! Transaction records and resolved transaction views.
//!
//! A [`TxnRecord`] is the persisted shape of a transaction: one row in the
//! transaction table. A [`TxnView`] is the resolved, immutable projection
//! handed to readers and writers: it carries its parent chain as
//! `Arc` links so that visibility and conflict decisions can walk the
//! chain without further store lookups.
//!
//! # Nested transactions
//!
//! A transaction may have a parent, forming a chain up to a parentless
//! root. Chains matter in three ways:
//! - A rollback anywhere in the chain voids every descendant's writes
//!   ([`TxnView::effective_state`]).
//! - A write only becomes visible to unrelated readers once the whole
//!   chain has committed; the timestamp that matters then is the
//!   outermost commit ([`TxnView::effective_commit_timestamp`]).
//! - Relatives get special treatment: ancestors' writes are always
//!   visible to descendants, and writes within one chain never conflict.

use std::sync::Arc;

use lattice_common::{IsolationLevel, TableId, TxnId, TxnState};

/// The persisted form of a transaction: one row in the transaction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnRecord {
    /// Transaction id; doubles as the begin timestamp.
    pub id: TxnId,
    /// Parent transaction id, or [`TxnId::INVALID`] for a root.
    pub parent_id: TxnId,
    /// Isolation level under which this transaction reads.
    pub isolation: IsolationLevel,
    /// Additive transactions neither see nor conflict with sibling
    /// additive transactions under the same parent.
    pub additive: bool,
    /// Current state.
    pub state: TxnState,
    /// Commit timestamp, or [`TxnId::INVALID`] while unset.
    pub commit_ts: TxnId,
    /// Tables this transaction has been elevated to write to. Empty for
    /// read-only transactions.
    pub destination_tables: Vec<TableId>,
    /// Wall-clock milliseconds of the last keep-alive heartbeat.
    pub last_keep_alive_ms: u64,
}

impl TxnRecord {
    /// Creates a fresh ACTIVE record.
    #[must_use]
    pub fn new_active(
        id: TxnId,
        parent_id: TxnId,
        isolation: IsolationLevel,
        additive: bool,
        destination_table: Option<TableId>,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            parent_id,
            isolation,
            additive,
            state: TxnState::Active,
            commit_ts: TxnId::INVALID,
            destination_tables: destination_table.into_iter().collect(),
            last_keep_alive_ms: now_ms,
        }
    }

    /// Returns true if this transaction has been elevated to write.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.destination_tables.is_empty()
    }
}

/// An immutable, resolved view of a transaction and its ancestor chain.
///
/// Views are produced by the transaction store with parents already
/// resolved, so every chain walk here is pure pointer chasing. A view is
/// a snapshot: it reflects the states observed at resolution time, and
/// terminal states never change once observed.
#[derive(Debug, Clone)]
pub struct TxnView {
    id: TxnId,
    parent: Option<Arc<TxnView>>,
    isolation: IsolationLevel,
    additive: bool,
    state: TxnState,
    commit_ts: Option<TxnId>,
    destination_tables: Vec<TableId>,
}

impl TxnView {
    /// Builds a view from a persisted record and its resolved parent.
    #[must_use]
    pub fn new(record: &TxnRecord, parent: Option<Arc<TxnView>>) -> Self {
        let commit_ts = if record.commit_ts.is_valid() {
            Some(record.commit_ts)
        } else {
            None
        };
        Self {
            id: record.id,
            parent,
            isolation: record.isolation,
            additive: record.additive,
            state: record.state,
            commit_ts,
            destination_tables: record.destination_tables.clone(),
        }
    }

    /// Builds a view for a read-only transaction that has no persisted
    /// record: it holds an id for snapshot purposes but never writes.
    #[must_use]
    pub fn read_only(id: TxnId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            parent: None,
            isolation,
            additive: false,
            state: TxnState::Active,
            commit_ts: None,
            destination_tables: Vec::new(),
        }
    }

    /// Builds a view identical to this one except for `state` and
    /// `commit_ts`, keeping the resolved parent chain.
    #[must_use]
    pub fn with_state(&self, state: TxnState, commit_ts: Option<TxnId>) -> Self {
        Self {
            state,
            commit_ts,
            ..self.clone()
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the begin timestamp, which is the id.
    #[must_use]
    pub fn begin_timestamp(&self) -> TxnId {
        self.id
    }

    /// Returns the resolved parent view, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<TxnView>> {
        self.parent.as_ref()
    }

    /// Returns the parent id, or [`TxnId::INVALID`] for a root.
    #[must_use]
    pub fn parent_id(&self) -> TxnId {
        self.parent.as_ref().map_or(TxnId::INVALID, |p| p.id)
    }

    /// Returns true for parentless transactions.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the isolation level.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Returns true for additive transactions.
    #[must_use]
    pub fn is_additive(&self) -> bool {
        self.additive
    }

    /// Returns this transaction's own state, without chain propagation.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Returns this transaction's own commit timestamp, if committed.
    #[must_use]
    pub fn commit_timestamp(&self) -> Option<TxnId> {
        self.commit_ts
    }

    /// Returns the tables this transaction writes to.
    #[must_use]
    pub fn writes_to(&self) -> &[TableId] {
        &self.destination_tables
    }

    /// Returns true if this transaction has been elevated to write.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.destination_tables.is_empty()
    }

    /// Returns true if `id` is this transaction or one of its ancestors.
    #[must_use]
    pub fn chain_contains(&self, id: TxnId) -> bool {
        let mut current = Some(self);
        while let Some(txn) = current {
            if txn.id == id {
                return true;
            }
            current = txn.parent.as_deref();
        }
        false
    }

    /// The state after propagating ancestor rollbacks: ROLLED_BACK if
    /// this transaction or any ancestor rolled back, otherwise this
    /// transaction's own state.
    ///
    /// Note that a committed child under a still-active parent is
    /// COMMITTED here; whether its writes are visible to anyone else is
    /// a separate question answered by [`Self::visible_state_to`].
    #[must_use]
    pub fn effective_state(&self) -> TxnState {
        let mut current = Some(self);
        while let Some(txn) = current {
            if txn.state == TxnState::RolledBack {
                return TxnState::RolledBack;
            }
            current = txn.parent.as_deref();
        }
        self.state
    }

    /// The timestamp at which this transaction's writes became visible
    /// to unrelated readers: the outermost commit timestamp, present
    /// only once the entire chain has committed.
    #[must_use]
    pub fn effective_commit_timestamp(&self) -> Option<TxnId> {
        let mut ts = None;
        let mut current = Some(self);
        while let Some(txn) = current {
            if txn.state != TxnState::Committed {
                return None;
            }
            ts = txn.commit_ts;
            current = txn.parent.as_deref();
        }
        ts
    }

    /// Returns true once this chain's outcome can never change again:
    /// a rollback anywhere in the chain, or the whole chain committed.
    #[must_use]
    pub fn chain_settled(&self) -> bool {
        self.effective_state() == TxnState::RolledBack
            || self.effective_commit_timestamp().is_some()
    }

    /// Collapses this transaction's chain as observed by `reader`:
    /// every level strictly below the closest ancestor shared with the
    /// reader is folded into a single `(state, commit_ts)` pair.
    ///
    /// A rollback at any collapsed level dominates. An active level
    /// makes the collapsed state ACTIVE with no timestamp, since the
    /// write is not yet durable to outsiders. When every collapsed level
    /// has committed, the commit timestamp reported is the outermost
    /// one, which is when the write became visible outside the chain.
    #[must_use]
    pub fn visible_state_to(&self, reader: &TxnView) -> (TxnState, Option<TxnId>) {
        let mut state = TxnState::Committed;
        let mut commit_ts = None;
        let mut current = Some(self);
        while let Some(txn) = current {
            if reader.chain_contains(txn.id) {
                break;
            }
            match txn.state {
                TxnState::RolledBack => return (TxnState::RolledBack, None),
                TxnState::Active => {
                    state = TxnState::Active;
                    commit_ts = None;
                }
                TxnState::Committed => {
                    if state == TxnState::Committed {
                        commit_ts = txn.commit_ts;
                    }
                }
            }
            current = txn.parent.as_deref();
        }
        (state, commit_ts)
    }

    /// Decides whether this transaction (the reader) sees a version
    /// written by `writer`.
    ///
    /// - A transaction always sees its own writes.
    /// - Additive siblings under the same parent never see each other.
    /// - Ancestors' writes are always visible to descendants.
    /// - A descendant's writes are visible to an ancestor once the
    ///   descendant has committed relative to that ancestor.
    /// - Unrelated writers are judged by the reader's isolation level
    ///   against the writer's collapsed state and commit timestamp.
    #[must_use]
    pub fn can_see(&self, writer: &TxnView) -> bool {
        if self.id == writer.id {
            return true;
        }
        if self.additive && writer.additive {
            let my_parent = self.parent_id();
            if my_parent.is_valid() && my_parent == writer.parent_id() {
                return false;
            }
        }
        if self.chain_contains(writer.id) {
            return true;
        }
        let (state, commit_ts) = writer.visible_state_to(self);
        if writer.chain_contains(self.id) {
            return state == TxnState::Committed;
        }
        self.isolation.can_see(self.id, state, commit_ts)
    }

    /// Decides whether a write by this transaction conflicts with an
    /// existing version written by `other`.
    ///
    /// Writes within one chain never conflict, and additive writers
    /// never conflict with each other. Otherwise `other`'s chain is
    /// collapsed as observed by this transaction: a rolled-back version
    /// is void, an in-flight one conflicts, and a committed one
    /// conflicts only if it committed after this transaction began.
    #[must_use]
    pub fn conflicts_with(&self, other: &TxnView) -> bool {
        if self.id == other.id {
            return false;
        }
        if self.additive && other.additive {
            return false;
        }
        if self.chain_contains(other.id) {
            return false;
        }
        let (state, commit_ts) = other.visible_state_to(self);
        if other.chain_contains(self.id) {
            // A still-active descendant's write blocks its ancestor.
            return state == TxnState::Active;
        }
        match state {
            TxnState::RolledBack => false,
            TxnState::Active => true,
            TxnState::Committed => commit_ts.map_or(true, |ts| ts > self.id),
        }
    }
}
