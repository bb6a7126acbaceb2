//! # lattice-common
//!
//! Common types, errors, and constants for LatticeDB.
//!
//! This crate provides the foundational pieces shared by the transaction
//! layer components:
//!
//! - **Types**: Core identifiers (`TxnId`, `TableId`) and the transaction
//!   state machine (`TxnState`, `IsolationLevel`)
//! - **Errors**: Unified error handling with `LatticeError`
//! - **Constants**: System-wide constants and default tuning values
//!
//! ## Example
//!
//! ```rust
//! use lattice_common::types::{TableId, TxnId, TxnState};
//! use lattice_common::error::LatticeResult;
//!
//! fn example() -> LatticeResult<()> {
//!     let txn_id = TxnId::new(42);
//!     let table = TableId::new(1184);
//!     assert!(txn_id.is_valid());
//!     assert!(TxnState::Active.is_active());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, LatticeError, LatticeResult};
pub use types::{IsolationLevel, TableId, TxnId, TxnState};
