//! Core types for the LatticeDB transaction layer.

mod ids;
mod state;

pub use ids::{TableId, TxnId};
pub use state::{IsolationLevel, TxnState};
