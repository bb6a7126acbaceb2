//! Transaction state machine and isolation levels.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::TxnId;

/// Lifecycle state of a transaction.
///
/// The state machine is `Active -> Committed` or `Active -> RolledBack`;
/// the terminal states are absorbing and a transaction never moves between
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnState {
    /// The transaction is in flight.
    Active,
    /// The transaction committed; a commit timestamp exists for writable
    /// transactions.
    Committed,
    /// The transaction rolled back (explicitly, or by ancestor rollback,
    /// or by missing its keep-alive window).
    RolledBack,
}

impl TxnState {
    /// Returns true while the transaction is in flight.
    #[inline]
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true once the transaction reached a terminal state.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Encodes the state as a single byte for durable records.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Committed => 1,
            Self::RolledBack => 2,
        }
    }

    /// Decodes a state byte written by [`TxnState::as_u8`].
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Active),
            1 => Some(Self::Committed),
            2 => Some(Self::RolledBack),
            _ => None,
        }
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
        };
        write!(f, "{name}")
    }
}

/// Isolation level under which a transaction reads.
///
/// The level decides which writers' data a reader may observe; the actual
/// chain and additive rules are layered on top by the transaction view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Sees everything that is not rolled back, including in-flight writes.
    ReadUncommitted,
    /// Sees any committed write, regardless of when it committed.
    ReadCommitted,
    /// Sees only writes that committed before this transaction began.
    #[default]
    SnapshotIsolation,
}

impl IsolationLevel {
    /// Visibility of a writer's data under this level, given the writer's
    /// state and commit timestamp as observed relative to the reader.
    #[must_use]
    pub fn can_see(
        self,
        reader_begin: TxnId,
        writer_state: TxnState,
        writer_commit_ts: Option<TxnId>,
    ) -> bool {
        match self {
            Self::ReadUncommitted => writer_state != TxnState::RolledBack,
            Self::ReadCommitted => writer_state == TxnState::Committed,
            Self::SnapshotIsolation => {
                writer_state == TxnState::Committed
                    && writer_commit_ts.map_or(false, |ts| ts <= reader_begin)
            }
        }
    }

    /// Encodes the level as a single byte for durable records.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadUncommitted => 0,
            Self::ReadCommitted => 1,
            Self::SnapshotIsolation => 2,
        }
    }

    /// Decodes a level byte written by [`IsolationLevel::as_u8`].
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ReadUncommitted),
            1 => Some(Self::ReadCommitted),
            2 => Some(Self::SnapshotIsolation),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "READ_UNCOMMITTED",
            Self::ReadCommitted => "READ_COMMITTED",
            Self::SnapshotIsolation => "SNAPSHOT_ISOLATION",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        assert!(TxnState::Active.is_active());
        assert!(!TxnState::Active.is_terminal());
        assert!(TxnState::Committed.is_terminal());
        assert!(TxnState::RolledBack.is_terminal());
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [TxnState::Active, TxnState::Committed, TxnState::RolledBack] {
            assert_eq!(TxnState::from_u8(state.as_u8()), Some(state));
        }
        assert_eq!(TxnState::from_u8(99), None);
    }

    #[test]
    fn test_isolation_roundtrip() {
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::SnapshotIsolation,
        ] {
            assert_eq!(IsolationLevel::from_u8(level.as_u8()), Some(level));
        }
    }

    #[test]
    fn test_snapshot_isolation_visibility() {
        let begin = TxnId::new(100);
        let si = IsolationLevel::SnapshotIsolation;

        // Committed before my begin: visible.
        assert!(si.can_see(begin, TxnState::Committed, Some(TxnId::new(50))));
        // Committed at exactly my begin timestamp: visible.
        assert!(si.can_see(begin, TxnState::Committed, Some(TxnId::new(100))));
        // Committed after my begin: not in my snapshot.
        assert!(!si.can_see(begin, TxnState::Committed, Some(TxnId::new(150))));
        // In flight or rolled back: never visible.
        assert!(!si.can_see(begin, TxnState::Active, None));
        assert!(!si.can_see(begin, TxnState::RolledBack, None));
    }

    #[test]
    fn test_read_committed_visibility() {
        let begin = TxnId::new(100);
        let rc = IsolationLevel::ReadCommitted;

        // Any committed write is visible, even if it committed after begin.
        assert!(rc.can_see(begin, TxnState::Committed, Some(TxnId::new(150))));
        assert!(!rc.can_see(begin, TxnState::Active, None));
    }

    #[test]
    fn test_read_uncommitted_visibility() {
        let begin = TxnId::new(100);
        let ru = IsolationLevel::ReadUncommitted;

        assert!(ru.can_see(begin, TxnState::Active, None));
        assert!(ru.can_see(begin, TxnState::Committed, Some(TxnId::new(150))));
        assert!(!ru.can_see(begin, TxnState::RolledBack, None));
    }

    #[test]
    fn test_default_level() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::SnapshotIsolation);
    }
}
