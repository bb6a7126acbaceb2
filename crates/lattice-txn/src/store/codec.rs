//! Cell encoding for transaction rows.
//!
//! A transaction is one row keyed by its big-endian id, split into four
//! cells. State and commit timestamp share a single cell so that the
//! terminal transition is one atomic compare-and-swap.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use lattice_common::{IsolationLevel, LatticeError, LatticeResult, TableId, TxnId, TxnState};

use crate::txn::TxnRecord;

use super::partition::TxnRow;

/// Immutable metadata: parent id, isolation level, additive flag.
pub(crate) const Q_INFO: u16 = 0;
/// State byte plus commit timestamp; the CAS target.
pub(crate) const Q_STATE: u16 = 1;
/// Destination table ids, eight bytes each.
pub(crate) const Q_TABLES: u16 = 2;
/// Last keep-alive heartbeat, wall-clock milliseconds.
pub(crate) const Q_KEEPALIVE: u16 = 3;

pub(crate) fn encode_row_key(id: TxnId) -> [u8; 8] {
    id.to_be_bytes()
}

pub(crate) fn decode_row_key(key: &[u8]) -> LatticeResult<TxnId> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| LatticeError::corruption(format!("transaction row key of {} bytes", key.len())))?;
    Ok(TxnId::from_be_bytes(bytes))
}

pub(crate) fn encode_info(record: &TxnRecord) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u64(record.parent_id.as_u64());
    buf.put_u8(record.isolation.as_u8());
    buf.put_u8(u8::from(record.additive));
    buf.freeze()
}

pub(crate) fn encode_state(state: TxnState, commit_ts: TxnId) -> Bytes {
    let mut buf = BytesMut::with_capacity(9);
    buf.put_u8(state.as_u8());
    buf.put_u64(commit_ts.as_u64());
    buf.freeze()
}

pub(crate) fn decode_state(cell: &[u8]) -> LatticeResult<(TxnState, TxnId)> {
    ensure_len(cell, 9, "transaction state")?;
    let mut buf = cell;
    let state = TxnState::from_u8(buf.get_u8())
        .ok_or_else(|| LatticeError::corruption("unknown transaction state byte"))?;
    let commit_ts = TxnId::new(buf.get_u64());
    Ok((state, commit_ts))
}

pub(crate) fn encode_tables(tables: &[TableId]) -> Bytes {
    let mut buf = BytesMut::with_capacity(tables.len() * 8);
    for table in tables {
        buf.put_u64(table.as_u64());
    }
    buf.freeze()
}

pub(crate) fn encode_keep_alive(at_ms: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u64(at_ms);
    buf.freeze()
}

/// Encodes a record into its full cell set.
pub(crate) fn encode_record(record: &TxnRecord) -> Vec<(u16, Bytes)> {
    vec![
        (Q_INFO, encode_info(record)),
        (Q_STATE, encode_state(record.state, record.commit_ts)),
        (Q_TABLES, encode_tables(&record.destination_tables)),
        (Q_KEEPALIVE, encode_keep_alive(record.last_keep_alive_ms)),
    ]
}

/// Decodes a full row back into a record.
pub(crate) fn decode_record(id: TxnId, row: &TxnRow) -> LatticeResult<TxnRecord> {
    let info = required_cell(row, Q_INFO, "info")?;
    ensure_len(info, 10, "transaction info")?;
    let mut buf = info;
    let parent_id = TxnId::new(buf.get_u64());
    let isolation = IsolationLevel::from_u8(buf.get_u8())
        .ok_or_else(|| LatticeError::corruption("unknown isolation level byte"))?;
    let additive = buf.get_u8() != 0;

    let (state, commit_ts) = decode_state(required_cell(row, Q_STATE, "state")?)?;

    let tables_cell = required_cell(row, Q_TABLES, "tables")?;
    if tables_cell.len() % 8 != 0 {
        return Err(LatticeError::corruption(format!(
            "table list cell of {} bytes",
            tables_cell.len()
        )));
    }
    let destination_tables = tables_cell
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = chunk;
            TableId::new(buf.get_u64())
        })
        .collect();

    let keep_alive_cell = required_cell(row, Q_KEEPALIVE, "keep-alive")?;
    ensure_len(keep_alive_cell, 8, "keep-alive")?;
    let mut buf = keep_alive_cell;
    let last_keep_alive_ms = buf.get_u64();

    Ok(TxnRecord {
        id,
        parent_id,
        isolation,
        additive,
        state,
        commit_ts,
        destination_tables,
        last_keep_alive_ms,
    })
}

fn required_cell<'a>(row: &'a TxnRow, qualifier: u16, what: &str) -> LatticeResult<&'a [u8]> {
    row.get(&qualifier)
        .map(|cell| cell.as_ref())
        .ok_or_else(|| LatticeError::corruption(format!("transaction row missing {what} cell")))
}

fn ensure_len(cell: &[u8], need: usize, what: &str) -> LatticeResult<()> {
    if cell.len() < need {
        return Err(LatticeError::corruption(format!(
            "{what} cell truncated to {} bytes",
            cell.len()
        )));
    }
    Ok(())
}
