//! Execution stream module
//!
//! Types and logic for folding transport-delivered execution events into
//! per-subject snapshots.

mod envelope;
mod reducer;
mod state;

pub use envelope::{EventEnvelope, EventKind, ExecutionStats};
pub use reducer::{apply, ReducerLimits};
pub use state::{ExecutionState, ExecutionStatus, OutputLine, SubjectInfo};
