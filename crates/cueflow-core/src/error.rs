//! Error types for Cueflow.
//!
//! All validation is synchronous and precedes mutation: a rejected
//! operation leaves the structure it targeted untouched. Payloads carry
//! the offending identities or indices for diagnosis. These are contract
//! violations, never transient faults, so nothing here is retried.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for Cueflow operations.
#[derive(Error, Debug)]
pub enum CueflowError {
    #[error("invalid child {child}: {reason}")]
    InvalidChild { child: Uuid, reason: String },

    #[error("timescale adjacency violation between clips {first} and {second}: a chained run may not mix duration- and rate-governed clips")]
    TimescaleAdjacency { first: Uuid, second: Uuid },

    #[error("structure of {owner} is locked: {reason}")]
    LockedStructure { owner: Uuid, reason: String },

    #[error("cannot remove sequence at index {index}: sequences before the cursor ({loaded}) have already been played")]
    TimeParadox { index: usize, loaded: usize },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("value {value} out of range (max {max})")]
    OutOfRange { value: usize, max: usize },

    #[error("operation requires idle state: {operation}")]
    Reentrancy { operation: String },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for Cueflow operations.
pub type Result<T> = std::result::Result<T, CueflowError>;
