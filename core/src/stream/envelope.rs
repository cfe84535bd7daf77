//! Event envelope types delivered by the execution transport
//!
//! The envelope shape is owned by the backend contract: a subject id, a
//! millisecond timestamp and a tagged payload. Event flow per subject:
//!
//! ```text
//! Started -> [Output | Progress | Heartbeat]* -> Completed/Failed/Cancelled
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::Result;

/// One transport-delivered event for a running unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// ID of the subject (task or background agent) this event belongs to
    pub subject_id: String,

    /// Timestamp of the event (milliseconds since epoch)
    pub timestamp: i64,

    /// The kind of event and its associated data
    pub kind: EventKind,
}

/// Discriminated union of execution event kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Execution has started
    Started {
        display_name: String,
        executor_id: String,
        /// Opaque backend mode string (e.g. "api", "cli:claude")
        execution_mode: String,
    },

    /// Output produced by the subject (stdout or stderr)
    Output {
        text: String,
        is_stderr: bool,
        /// Whether this is a complete line (ends with a newline)
        is_complete: bool,
    },

    /// Progress update for long-running work
    Progress {
        phase: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Execution finished successfully
    Completed {
        result: String,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<ExecutionStats>,
    },

    /// Execution failed
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        duration_ms: u64,
        recoverable: bool,
    },

    /// Execution was cancelled (timeout or user request)
    Cancelled { reason: String, duration_ms: u64 },

    /// Liveness signal while the subject keeps running
    Heartbeat { elapsed_ms: u64 },

    /// Catch-all for event kinds this build does not know about.
    /// Newer backends may emit kinds we skip rather than reject.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Check if this kind ends the subject's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

/// Statistics reported with a completed execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_lines: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

impl EventEnvelope {
    /// Create a new envelope with the current timestamp
    pub fn new(subject_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp: Utc::now().timestamp_millis(),
            kind,
        }
    }

    /// Create a started event
    pub fn started(
        subject_id: impl Into<String>,
        display_name: impl Into<String>,
        executor_id: impl Into<String>,
        execution_mode: impl Into<String>,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Started {
                display_name: display_name.into(),
                executor_id: executor_id.into(),
                execution_mode: execution_mode.into(),
            },
        )
    }

    /// Create an output event; completeness is derived from a trailing newline
    pub fn output(subject_id: impl Into<String>, text: impl Into<String>, is_stderr: bool) -> Self {
        let text = text.into();
        let is_complete = text.ends_with('\n');
        Self::new(
            subject_id,
            EventKind::Output {
                text,
                is_stderr,
                is_complete,
            },
        )
    }

    /// Create an output event with explicit completeness
    pub fn output_partial(
        subject_id: impl Into<String>,
        text: impl Into<String>,
        is_stderr: bool,
        is_complete: bool,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Output {
                text: text.into(),
                is_stderr,
                is_complete,
            },
        )
    }

    /// Create a progress event
    pub fn progress(
        subject_id: impl Into<String>,
        phase: impl Into<String>,
        percent: Option<u8>,
        details: Option<String>,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Progress {
                phase: phase.into(),
                percent,
                details,
            },
        )
    }

    /// Create a completed event
    pub fn completed(
        subject_id: impl Into<String>,
        result: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Completed {
                result: result.into(),
                duration_ms,
                stats: None,
            },
        )
    }

    /// Create a completed event with statistics
    pub fn completed_with_stats(
        subject_id: impl Into<String>,
        result: impl Into<String>,
        duration_ms: u64,
        stats: ExecutionStats,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Completed {
                result: result.into(),
                duration_ms,
                stats: Some(stats),
            },
        )
    }

    /// Create a failed event
    pub fn failed(
        subject_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
        recoverable: bool,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Failed {
                error: error.into(),
                error_code: None,
                duration_ms,
                recoverable,
            },
        )
    }

    /// Create a failed event with an error code
    pub fn failed_with_code(
        subject_id: impl Into<String>,
        error: impl Into<String>,
        error_code: impl Into<String>,
        duration_ms: u64,
        recoverable: bool,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Failed {
                error: error.into(),
                error_code: Some(error_code.into()),
                duration_ms,
                recoverable,
            },
        )
    }

    /// Create a cancelled event
    pub fn cancelled(
        subject_id: impl Into<String>,
        reason: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self::new(
            subject_id,
            EventKind::Cancelled {
                reason: reason.into(),
                duration_ms,
            },
        )
    }

    /// Create a timeout event (cancelled with a timeout reason)
    pub fn timeout(subject_id: impl Into<String>, timeout_secs: u64, duration_ms: u64) -> Self {
        Self::cancelled(
            subject_id,
            format!("Timed out after {} seconds", timeout_secs),
            duration_ms,
        )
    }

    /// Create a heartbeat event
    pub fn heartbeat(subject_id: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::new(subject_id, EventKind::Heartbeat { elapsed_ms })
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
