//! Lifecycle state shared by the scheduler, spider runs and the crawler pool
//!
//! # Components
//!
//! - `Status`: the run/pause/stop state machine used by every long-lived component
//! - `RunStats`: per-run success and failure counters

mod stats;
mod status;

// Re-export main types
pub use stats::RunStats;
pub use status::Status;
