//! Cueflow Core - Foundation types for the playback orchestration engine
//!
//! This crate provides the fundamental types used throughout Cueflow:
//! - Time representation (TimePoint, TimeSpan) in exact rational milliseconds
//! - Playback traversal vocabulary (Direction, Phase, PhasePoint, Boundary)
//! - Error types shared by every engine operation

pub mod error;
pub mod time;

pub use error::{CueflowError, Result};
pub use time::{Boundary, Direction, Phase, PhasePoint, TimePoint, TimeSpan};
