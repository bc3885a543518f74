//! Integration test crate for Cueflow.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on the core and engine crates to verify they work
//! together, driving full timelines over tokio's paused test clock.

#[cfg(test)]
mod playback;

#[cfg(test)]
mod navigation;
