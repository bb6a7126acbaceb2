//! Error types for the LatticeDB transaction layer.
//!
//! Provides the unified error enum used by every transaction component.
//! Write-admission rejection is deliberately *not* here: being told to back
//! off is an expected outcome and is modeled as a return value, not an
//! error.

use std::fmt;
use thiserror::Error;

use crate::types::{TableId, TxnId, TxnState};

/// Result alias for transaction-layer operations.
pub type LatticeResult<T> = Result<T, LatticeError>;

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,
    /// Operation timed out.
    Timeout = 0x0003,

    // Storage errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Backing store refused or failed the operation.
    StorageUnavailable = 0x0101,
    /// Stored bytes failed to decode.
    Corruption = 0x0102,

    // Transaction errors (0x0200 - 0x02FF)
    /// Transaction not found.
    TransactionNotFound = 0x0200,
    /// Operation requires an ACTIVE transaction.
    TransactionNotActive = 0x0201,
    /// Rollback attempted on a committed transaction.
    AlreadyCommitted = 0x0202,
    /// Child creation under a parent that is no longer active.
    ParentNotActive = 0x0203,
    /// Write attempted without elevating to the target table.
    TransactionNotElevated = 0x0204,
    /// Lost a compare-and-set race on transaction state.
    ConcurrentStateChange = 0x0205,

    // Write errors (0x0300 - 0x03FF)
    /// Write-write conflict between overlapping transactions.
    WriteConflict = 0x0300,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Storage",
            0x02 => "Transaction",
            0x03 => "Write",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for the LatticeDB transaction layer.
///
/// Each variant carries the context a caller needs to decide between
/// retrying, surfacing the failure, or treating it as an expected outcome
/// (e.g. an idempotent rollback).
///
/// # Example
///
/// ```rust
/// use lattice_common::error::{LatticeError, LatticeResult};
/// use lattice_common::types::TxnId;
///
/// fn lookup(txn_id: TxnId) -> LatticeResult<()> {
///     Err(LatticeError::TransactionNotFound { txn_id })
/// }
/// ```
#[derive(Debug, Error)]
pub enum LatticeError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The durable backing store cannot accept the operation right now.
    ///
    /// Retryable; the store layer wraps these in bounded exponential
    /// backoff before surfacing them.
    #[error("backing store unavailable: {reason}")]
    StorageUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// Stored bytes failed to decode.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Transaction not found.
    #[error("transaction {txn_id} not found")]
    TransactionNotFound {
        /// The missing transaction.
        txn_id: TxnId,
    },

    /// Operation requires an ACTIVE transaction.
    #[error("transaction {txn_id} is not active (state: {state})")]
    TransactionNotActive {
        /// The transaction.
        txn_id: TxnId,
        /// Its observed state.
        state: TxnState,
    },

    /// Rollback attempted on a transaction that already committed.
    #[error("transaction {txn_id} already committed at {commit_ts}")]
    AlreadyCommitted {
        /// The committed transaction.
        txn_id: TxnId,
        /// Its commit timestamp.
        commit_ts: TxnId,
    },

    /// Child creation was attempted under a parent that is no longer active.
    #[error("parent transaction {parent_id} is not active (state: {state})")]
    ParentNotActive {
        /// The parent transaction.
        parent_id: TxnId,
        /// The parent's observed effective state.
        state: TxnState,
    },

    /// A write was attempted without first elevating to the target table.
    #[error("transaction {txn_id} is not elevated for writes to table {table}")]
    TransactionNotElevated {
        /// The read-only or under-elevated transaction.
        txn_id: TxnId,
        /// The table the write targeted.
        table: TableId,
    },

    /// A compare-and-set on transaction state lost to another actor whose
    /// outcome contradicts the intended one. Callers re-read and decide.
    #[error("transaction {txn_id} state changed concurrently")]
    ConcurrentStateChange {
        /// The contended transaction.
        txn_id: TxnId,
    },

    // ==========================================================================
    // Write Errors
    // ==========================================================================
    /// Write-write conflict between transactions with overlapping windows.
    #[error("transaction {txn_id} conflicts with {conflicting_txn_id} on row {row:?}")]
    WriteConflict {
        /// The transaction whose write failed.
        txn_id: TxnId,
        /// The transaction it conflicts with.
        conflicting_txn_id: TxnId,
        /// The contended row key.
        row: bytes::Bytes,
    },
}

impl LatticeError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } | Self::InvalidConfig { .. } => ErrorCode::InvalidArgument,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Io { .. } => ErrorCode::Io,
            Self::StorageUnavailable { .. } => ErrorCode::StorageUnavailable,
            Self::Corruption { .. } => ErrorCode::Corruption,
            Self::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
            Self::TransactionNotActive { .. } => ErrorCode::TransactionNotActive,
            Self::AlreadyCommitted { .. } => ErrorCode::AlreadyCommitted,
            Self::ParentNotActive { .. } => ErrorCode::ParentNotActive,
            Self::TransactionNotElevated { .. } => ErrorCode::TransactionNotElevated,
            Self::ConcurrentStateChange { .. } => ErrorCode::ConcurrentStateChange,
            Self::WriteConflict { .. } => ErrorCode::WriteConflict,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::Timeout { .. } | Self::ConcurrentStateChange { .. }
        )
    }

    /// Returns true if this error represents a transaction conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a storage unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = LatticeError::TransactionNotFound {
            txn_id: TxnId::new(42),
        };
        assert_eq!(err.code(), ErrorCode::TransactionNotFound);
        assert_eq!(err.code().category(), "Transaction");
    }

    #[test]
    fn test_error_display() {
        let err = LatticeError::TransactionNotFound {
            txn_id: TxnId::new(42),
        };
        assert_eq!(err.to_string(), "transaction 42 not found");

        let err = LatticeError::TransactionNotActive {
            txn_id: TxnId::new(7),
            state: TxnState::Committed,
        };
        assert_eq!(err.to_string(), "transaction 7 is not active (state: COMMITTED)");
    }

    #[test]
    fn test_retryable() {
        assert!(LatticeError::unavailable("region moved").is_retryable());
        assert!(LatticeError::ConcurrentStateChange {
            txn_id: TxnId::new(1)
        }
        .is_retryable());
        assert!(!LatticeError::TransactionNotFound {
            txn_id: TxnId::new(1)
        }
        .is_retryable());
    }

    #[test]
    fn test_conflict() {
        let err = LatticeError::WriteConflict {
            txn_id: TxnId::new(11),
            conflicting_txn_id: TxnId::new(10),
            row: bytes::Bytes::from_static(b"row-1"),
        };
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LatticeError = io_err.into();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.code().category(), "Storage");
    }
}
