//! Utility modules
//!
//! Shared data structures used by the chunking pipeline.

pub mod cache;

pub use cache::*;
