//! # lattice-pipeline
//!
//! Write admission control for LatticeDB's transactional write pipeline.
//!
//! This crate implements:
//! - Shared dependent/independent write budgets (threads and rows)
//! - Lock-free admission over packed atomic counters
//! - Independent-to-dependent budget stealing
//! - Runtime-adjustable limits

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Admission counters and budgets
pub mod traffic;

pub use traffic::{
    WriteAdmission, WriteControl, WriteControlLimits, WritePermit, WriteStatus,
};
