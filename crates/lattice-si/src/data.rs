//! Versioned cells, mutations, and the packed-row encoding.
//!
//! Every cell in a transactional table carries the id of the
//! transaction that wrote it as its version. Alongside user data, three
//! bookkeeping kinds exist:
//!
//! - A commit-timestamp cell records a writer's settled outcome right
//!   on the row, so readers skip the transaction-store lookup. Its
//!   value is the commit timestamp, or [`ROLLED_BACK_MARKER`] when the
//!   writer rolled back.
//! - A tombstone marks the row deleted as of its version.
//! - An anti-tombstone marks a re-insert over a deleted row; versions
//!   older than it stay dead even if the deleting transaction later
//!   rolls back.
//!
//! User data is stored packed: one cell per version holding every
//! written column as length-prefixed `(qualifier, value)` fields.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use lattice_common::{LatticeError, LatticeResult, TxnId, ROLLED_BACK_MARKER};

/// Qualifier under which packed user data is stored.
pub const PACKED_COLUMN: u16 = 0;

/// The kind of a versioned cell.
///
/// Kinds are grouped so that a row's cells sort bookkeeping first:
/// commit timestamps, then deletion markers, then user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// A writer's settled outcome, persisted on the row.
    CommitTimestamp,
    /// The row is deleted as of this version.
    Tombstone,
    /// The row is re-inserted at this version.
    AntiTombstone,
    /// Packed user data.
    UserData,
    /// A cell this layer does not interpret.
    Other,
}

impl CellKind {
    /// Sort group within a row; lower groups scan first.
    #[must_use]
    pub fn group(self) -> u8 {
        match self {
            CellKind::CommitTimestamp => 0,
            CellKind::Tombstone | CellKind::AntiTombstone => 1,
            CellKind::UserData => 2,
            CellKind::Other => 3,
        }
    }
}

/// A writer's settled outcome, as recorded by a commit-timestamp cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnResolution {
    /// The writer committed at this timestamp.
    Committed(TxnId),
    /// The writer rolled back; its versions are void.
    RolledBack,
}

/// One versioned cell of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCell {
    /// Row key.
    pub row: Bytes,
    /// Cell kind.
    pub kind: CellKind,
    /// Column qualifier within the kind's group.
    pub qualifier: u16,
    /// Id of the transaction that wrote this cell.
    pub version: TxnId,
    /// Cell payload.
    pub value: Bytes,
}

impl DataCell {
    /// A commit-timestamp cell recording a commit at `commit_ts`.
    #[must_use]
    pub fn commit_timestamp(row: Bytes, version: TxnId, commit_ts: TxnId) -> Self {
        Self {
            row,
            kind: CellKind::CommitTimestamp,
            qualifier: 0,
            version,
            value: Bytes::copy_from_slice(&commit_ts.to_be_bytes()),
        }
    }

    /// A commit-timestamp cell recording a rollback.
    #[must_use]
    pub fn rolled_back_marker(row: Bytes, version: TxnId) -> Self {
        Self {
            row,
            kind: CellKind::CommitTimestamp,
            qualifier: 0,
            version,
            value: Bytes::copy_from_slice(&ROLLED_BACK_MARKER.to_be_bytes()),
        }
    }

    /// A deletion marker.
    #[must_use]
    pub fn tombstone(row: Bytes, version: TxnId) -> Self {
        Self {
            row,
            kind: CellKind::Tombstone,
            qualifier: 0,
            version,
            value: Bytes::new(),
        }
    }

    /// A re-insert marker over a deleted row.
    #[must_use]
    pub fn anti_tombstone(row: Bytes, version: TxnId) -> Self {
        Self {
            row,
            kind: CellKind::AntiTombstone,
            qualifier: 0,
            version,
            value: Bytes::new(),
        }
    }

    /// A packed user-data cell.
    #[must_use]
    pub fn user(row: Bytes, version: TxnId, value: Bytes) -> Self {
        Self {
            row,
            kind: CellKind::UserData,
            qualifier: PACKED_COLUMN,
            version,
            value,
        }
    }

    /// Interprets a commit-timestamp cell's payload.
    pub fn decode_commit_timestamp(&self) -> LatticeResult<TxnResolution> {
        if self.kind != CellKind::CommitTimestamp {
            return Err(LatticeError::corruption(format!(
                "decoding commit timestamp from a {:?} cell",
                self.kind
            )));
        }
        let raw: [u8; 8] = self.value.as_ref().try_into().map_err(|_| {
            LatticeError::corruption(format!(
                "commit-timestamp cell of {} bytes",
                self.value.len()
            ))
        })?;
        let raw = u64::from_be_bytes(raw);
        if raw == ROLLED_BACK_MARKER {
            Ok(TxnResolution::RolledBack)
        } else {
            Ok(TxnResolution::Committed(TxnId::new(raw)))
        }
    }
}

/// How a mutation changes its target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Creates the row; the constraint checker may require absence.
    Insert,
    /// Rewrites columns of an existing row.
    Update,
    /// Insert-or-update without an existence requirement.
    Upsert,
    /// Deletes the row.
    Delete,
}

/// One row mutation, carrying an already-packed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvMutation {
    /// Target row key.
    pub row: Bytes,
    /// Packed value; ignored for deletes.
    pub value: Bytes,
    /// Mutation kind.
    pub kind: MutationKind,
}

impl KvMutation {
    /// An insert of `value` at `row`.
    #[must_use]
    pub fn insert(row: Bytes, value: Bytes) -> Self {
        Self {
            row,
            value,
            kind: MutationKind::Insert,
        }
    }

    /// An update of `row` to `value`.
    #[must_use]
    pub fn update(row: Bytes, value: Bytes) -> Self {
        Self {
            row,
            value,
            kind: MutationKind::Update,
        }
    }

    /// An upsert of `value` at `row`.
    #[must_use]
    pub fn upsert(row: Bytes, value: Bytes) -> Self {
        Self {
            row,
            value,
            kind: MutationKind::Upsert,
        }
    }

    /// A delete of `row`.
    #[must_use]
    pub fn delete(row: Bytes) -> Self {
        Self {
            row,
            value: Bytes::new(),
            kind: MutationKind::Delete,
        }
    }
}

/// Packs `(qualifier, value)` fields into one cell payload.
#[must_use]
pub fn encode_packed_entry(fields: &[(u16, Bytes)]) -> Bytes {
    let mut buf = BytesMut::with_capacity(fields.iter().map(|(_, v)| v.len() + 6).sum());
    for (qualifier, value) in fields {
        buf.put_u16(*qualifier);
        buf.put_u32(u32::try_from(value.len()).unwrap_or(u32::MAX));
        buf.put_slice(value);
    }
    buf.freeze()
}

/// Unpacks a cell payload into its `(qualifier, value)` fields.
pub fn decode_packed_entry(value: &[u8]) -> LatticeResult<Vec<(u16, Bytes)>> {
    let mut fields = Vec::new();
    let mut buf = value;
    while !buf.is_empty() {
        if buf.len() < 6 {
            return Err(LatticeError::corruption(format!(
                "packed entry truncated at {} trailing bytes",
                buf.len()
            )));
        }
        let qualifier = buf.get_u16();
        let len = buf.get_u32() as usize;
        if buf.len() < len {
            return Err(LatticeError::corruption(format!(
                "packed field of {len} bytes with {} remaining",
                buf.len()
            )));
        }
        fields.push((qualifier, Bytes::copy_from_slice(&buf[..len])));
        buf.advance(len);
    }
    Ok(fields)
}
