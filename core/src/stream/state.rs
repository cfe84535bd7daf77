//! Folded execution state for one subject

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::envelope::{EventEnvelope, ExecutionStats};

/// Status of a tracked execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Subscribed, no Started event observed yet
    Pending,
    /// Subject is running
    Running,
    /// Execution completed successfully
    Completed,
    /// Execution failed
    Failed,
    /// Execution was cancelled
    Cancelled,
}

impl ExecutionStatus {
    /// Check if the status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the status represents an active state
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// One buffered output line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub text: String,
    pub is_stderr: bool,
    /// Timestamp of the carrying event (milliseconds since epoch)
    pub timestamp: i64,
}

/// Summary of an active subject as reported by the transport listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_id: String,
    pub display_name: String,
    pub executor_id: String,
    /// When the subject started (milliseconds since epoch)
    pub started_at: i64,
    pub execution_mode: String,
}

/// Folded snapshot of one subject's execution stream
///
/// Created lazily on the first event for a subject (or seeded as a
/// placeholder from the transport listing) and mutated only by the
/// reducer. Output and event history are bounded; see
/// [`ReducerLimits`](super::ReducerLimits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub subject_id: String,
    pub display_name: Option<String>,
    pub executor_id: Option<String>,
    pub execution_mode: Option<String>,

    pub status: ExecutionStatus,

    /// Accumulated stdout text, capped to the most recent bytes
    pub stdout: String,
    /// Accumulated stderr text, capped to the most recent bytes
    pub stderr: String,
    /// Buffered output lines, oldest dropped first
    pub output_lines: VecDeque<OutputLine>,

    pub progress_phase: Option<String>,
    pub progress_percent: Option<u8>,

    pub result: Option<String>,
    pub error: Option<String>,
    pub stats: Option<ExecutionStats>,

    pub duration_ms: u64,
    /// Timestamp of the Started event (milliseconds since epoch)
    pub started_at: Option<i64>,
    /// Timestamp of the last Heartbeat event (milliseconds since epoch)
    pub last_heartbeat: Option<i64>,

    /// Raw envelope history, oldest dropped first
    pub events: VecDeque<EventEnvelope>,
}

impl ExecutionState {
    /// Create an empty pending state for a subject
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: None,
            executor_id: None,
            execution_mode: None,
            status: ExecutionStatus::Pending,
            stdout: String::new(),
            stderr: String::new(),
            output_lines: VecDeque::new(),
            progress_phase: None,
            progress_percent: None,
            result: None,
            error: None,
            stats: None,
            duration_ms: 0,
            started_at: None,
            last_heartbeat: None,
            events: VecDeque::new(),
        }
    }

    /// Seed a running state from the transport's active-subject listing.
    ///
    /// Used to reconcile subjects that started before the observer
    /// attached; no Started event will be replayed for them.
    pub fn placeholder(info: &SubjectInfo) -> Self {
        let mut state = Self::new(info.subject_id.clone());
        state.display_name = Some(info.display_name.clone());
        state.executor_id = Some(info.executor_id.clone());
        state.execution_mode = Some(info.execution_mode.clone());
        state.status = ExecutionStatus::Running;
        state.started_at = Some(info.started_at);
        state
    }

    /// Check if the subject is currently running
    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    /// Check if the subject reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Ordered join of the buffered output line text.
    ///
    /// No separator is inserted beyond what the lines themselves carry.
    pub fn combined_output(&self) -> String {
        let mut out = String::with_capacity(self.output_lines.iter().map(|l| l.text.len()).sum());
        for line in &self.output_lines {
            out.push_str(&line.text);
        }
        out
    }

    /// Number of buffered output lines
    pub fn output_line_count(&self) -> usize {
        self.output_lines.len()
    }
}
