//! Pure fold of execution events into per-subject state
//!
//! The reducer is synchronous and lock-free: adapters own the
//! serialization of events (single writer per subject) and call
//! [`apply`] once per envelope in delivery order.

use super::envelope::{EventEnvelope, EventKind};
use super::state::{ExecutionState, ExecutionStatus, OutputLine};

/// Buffer bounds applied by the reducer
#[derive(Debug, Clone)]
pub struct ReducerLimits {
    /// Maximum buffered output lines per subject
    pub max_output_lines: usize,
    /// Maximum raw envelopes kept in the history ring
    pub max_events: usize,
    /// Maximum bytes retained in each of the stdout/stderr accumulators
    pub max_stream_bytes: usize,
}

impl Default for ReducerLimits {
    fn default() -> Self {
        Self {
            max_output_lines: 5000,
            max_events: 500,
            max_stream_bytes: 512 * 1024,
        }
    }
}

impl ReducerLimits {
    pub fn with_max_output_lines(mut self, max: usize) -> Self {
        self.max_output_lines = max;
        self
    }

    pub fn with_max_events(mut self, max: usize) -> Self {
        self.max_events = max;
        self
    }

    pub fn with_max_stream_bytes(mut self, max: usize) -> Self {
        self.max_stream_bytes = max;
        self
    }
}

/// Fold one envelope into the subject's state.
///
/// A `None` state, or a state keyed to a different subject, starts a
/// fresh snapshot for the envelope's subject; stale state never carries
/// over. The envelope is always recorded in the history ring; once the
/// status is terminal no other field is mutated, so late `Output` or
/// `Progress` events cannot resurrect a finished subject.
pub fn apply(
    state: Option<ExecutionState>,
    envelope: EventEnvelope,
    limits: &ReducerLimits,
) -> ExecutionState {
    let mut state = match state {
        Some(state) if state.subject_id == envelope.subject_id => state,
        _ => ExecutionState::new(envelope.subject_id.clone()),
    };

    let timestamp = envelope.timestamp;

    state.events.push_back(envelope.clone());
    while state.events.len() > limits.max_events {
        state.events.pop_front();
    }

    if state.status.is_terminal() {
        return state;
    }

    match envelope.kind {
        EventKind::Started {
            display_name,
            executor_id,
            execution_mode,
        } => {
            state.status = ExecutionStatus::Running;
            state.display_name = Some(display_name);
            state.executor_id = Some(executor_id);
            state.execution_mode = Some(execution_mode);
            state.started_at = Some(timestamp);
        }

        EventKind::Output {
            text, is_stderr, ..
        } => {
            state.output_lines.push_back(OutputLine {
                text: text.clone(),
                is_stderr,
                timestamp,
            });
            while state.output_lines.len() > limits.max_output_lines {
                state.output_lines.pop_front();
            }

            let buffer = if is_stderr {
                &mut state.stderr
            } else {
                &mut state.stdout
            };
            buffer.push_str(&text);
            trim_front(buffer, limits.max_stream_bytes);
        }

        EventKind::Progress { phase, percent, .. } => {
            // Last write wins; percent may move backward for multi-phase work
            state.progress_phase = Some(phase);
            state.progress_percent = percent;
        }

        EventKind::Completed {
            result,
            duration_ms,
            stats,
        } => {
            state.status = ExecutionStatus::Completed;
            state.result = Some(result);
            state.duration_ms = duration_ms;
            state.stats = stats;
        }

        EventKind::Failed {
            error, duration_ms, ..
        } => {
            state.status = ExecutionStatus::Failed;
            state.error = Some(error);
            state.duration_ms = duration_ms;
        }

        EventKind::Cancelled {
            reason,
            duration_ms,
        } => {
            state.status = ExecutionStatus::Cancelled;
            state.error = Some(reason);
            state.duration_ms = duration_ms;
        }

        EventKind::Heartbeat { elapsed_ms } => {
            state.last_heartbeat = Some(timestamp);
            state.duration_ms = elapsed_ms;
        }

        EventKind::Unknown => {}
    }

    state
}

/// Drop bytes from the front of `buf` until it fits `max_bytes`,
/// keeping the cut on a char boundary.
fn trim_front(buf: &mut String, max_bytes: usize) {
    if buf.len() <= max_bytes {
        return;
    }
    let mut cut = buf.len() - max_bytes;
    while cut < buf.len() && !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(events: Vec<EventEnvelope>, limits: &ReducerLimits) -> ExecutionState {
        let mut state = None;
        for event in events {
            state = Some(apply(state, event, limits));
        }
        state.expect("at least one event")
    }

    #[test]
    fn test_started_output_completed_scenario() {
        let limits = ReducerLimits::default();
        let state = fold(
            vec![
                EventEnvelope::started("task-1", "Build", "agent-1", "api"),
                EventEnvelope::output("task-1", "line1\n", false),
                EventEnvelope::completed("task-1", "ok", 500),
            ],
            &limits,
        );

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.stdout, "line1\n");
        assert_eq!(state.output_line_count(), 1);
        assert!(!state.output_lines[0].is_stderr);
        assert_eq!(state.result.as_deref(), Some("ok"));
        assert_eq!(state.duration_ms, 500);
    }

    #[test]
    fn test_status_runs_until_terminal_and_sticks() {
        let limits = ReducerLimits::default();
        let mut state = apply(
            None,
            EventEnvelope::started("task-1", "Build", "agent-1", "api"),
            &limits,
        );
        assert_eq!(state.status, ExecutionStatus::Running);

        state = apply(
            Some(state),
            EventEnvelope::heartbeat("task-1", 1000),
            &limits,
        );
        assert_eq!(state.status, ExecutionStatus::Running);

        state = apply(
            Some(state),
            EventEnvelope::failed("task-1", "boom", 1500, false),
            &limits,
        );
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));

        // A later terminal event must not overwrite the first one
        state = apply(
            Some(state),
            EventEnvelope::completed("task-1", "late", 9999),
            &limits,
        );
        assert_eq!(state.status, ExecutionStatus::Failed);
        assert_eq!(state.duration_ms, 1500);
        assert!(state.result.is_none());
    }

    #[test]
    fn test_post_terminal_output_is_ignored_but_recorded() {
        let limits = ReducerLimits::default();
        let mut state = fold(
            vec![
                EventEnvelope::started("task-1", "Build", "agent-1", "api"),
                EventEnvelope::output("task-1", "before\n", false),
                EventEnvelope::completed("task-1", "ok", 100),
            ],
            &limits,
        );
        let events_before = state.events.len();

        state = apply(
            Some(state),
            EventEnvelope::output("task-1", "after\n", false),
            &limits,
        );

        assert_eq!(state.stdout, "before\n");
        assert_eq!(state.output_line_count(), 1);
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.events.len(), events_before + 1);
    }

    #[test]
    fn test_output_ring_keeps_most_recent() {
        let limits = ReducerLimits::default().with_max_output_lines(5);
        let mut state = Some(apply(
            None,
            EventEnvelope::started("task-1", "Build", "agent-1", "api"),
            &limits,
        ));
        for i in 0..10 {
            state = Some(apply(
                state,
                EventEnvelope::output("task-1", format!("line{}\n", i), false),
                &limits,
            ));
        }

        let state = state.unwrap();
        assert_eq!(state.output_line_count(), 5);
        let texts: Vec<&str> = state.output_lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["line5\n", "line6\n", "line7\n", "line8\n", "line9\n"]);
        assert_eq!(state.combined_output(), "line5\nline6\nline7\nline8\nline9\n");
    }

    #[test]
    fn test_event_ring_keeps_most_recent() {
        let limits = ReducerLimits::default().with_max_events(3);
        let mut state = None;
        for i in 0..7 {
            state = Some(apply(
                state,
                EventEnvelope::heartbeat("task-1", i * 100),
                &limits,
            ));
        }

        let state = state.unwrap();
        assert_eq!(state.events.len(), 3);
        match &state.events[0].kind {
            EventKind::Heartbeat { elapsed_ms } => assert_eq!(*elapsed_ms, 400),
            _ => panic!("Expected Heartbeat event"),
        }
        assert_eq!(state.duration_ms, 600);
    }

    #[test]
    fn test_subject_mismatch_starts_fresh() {
        let limits = ReducerLimits::default();
        let state = apply(
            None,
            EventEnvelope::started("task-1", "Build", "agent-1", "api"),
            &limits,
        );

        let state = apply(Some(state), EventEnvelope::output("task-2", "x\n", false), &limits);

        assert_eq!(state.subject_id, "task-2");
        assert_eq!(state.status, ExecutionStatus::Pending);
        assert!(state.display_name.is_none());
        assert_eq!(state.stdout, "x\n");
        assert_eq!(state.events.len(), 1);
    }

    #[test]
    fn test_progress_last_write_wins() {
        let limits = ReducerLimits::default();
        let state = fold(
            vec![
                EventEnvelope::started("task-1", "Build", "agent-1", "api"),
                EventEnvelope::progress("task-1", "compile", Some(80), None),
                EventEnvelope::progress("task-1", "link", Some(20), Some("second pass".into())),
            ],
            &limits,
        );

        assert_eq!(state.progress_phase.as_deref(), Some("link"));
        assert_eq!(state.progress_percent, Some(20));
    }

    #[test]
    fn test_stderr_routed_separately() {
        let limits = ReducerLimits::default();
        let state = fold(
            vec![
                EventEnvelope::started("task-1", "Build", "agent-1", "api"),
                EventEnvelope::output("task-1", "out\n", false),
                EventEnvelope::output("task-1", "err\n", true),
            ],
            &limits,
        );

        assert_eq!(state.stdout, "out\n");
        assert_eq!(state.stderr, "err\n");
        assert_eq!(state.output_line_count(), 2);
        assert_eq!(state.combined_output(), "out\nerr\n");
    }

    #[test]
    fn test_stream_accumulator_capped() {
        let limits = ReducerLimits::default().with_max_stream_bytes(8);
        let mut state = None;
        for chunk in ["aaaa", "bbbb", "cccc"] {
            state = Some(apply(
                state,
                EventEnvelope::output_partial("task-1", chunk, false, false),
                &limits,
            ));
        }

        let state = state.unwrap();
        assert_eq!(state.stdout, "bbbbcccc");
    }

    #[test]
    fn test_stream_cap_respects_char_boundaries() {
        let limits = ReducerLimits::default().with_max_stream_bytes(5);
        let state = apply(
            None,
            EventEnvelope::output_partial("task-1", "xéééé", false, false),
            &limits,
        );

        // Each é is two bytes; the cut may keep less than the cap but
        // must stay valid UTF-8
        assert!(state.stdout.len() <= 5);
        assert!(state.stdout.ends_with("éé"));
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let limits = ReducerLimits::default();
        let mut state = apply(
            None,
            EventEnvelope::started("task-1", "Build", "agent-1", "api"),
            &limits,
        );

        let unknown = EventEnvelope::from_json(
            r#"{"subject_id":"task-1","timestamp":5,"kind":{"type":"checkpoint_saved"}}"#,
        )
        .unwrap();
        state = apply(Some(state), unknown, &limits);

        assert_eq!(state.status, ExecutionStatus::Running);
        assert_eq!(state.events.len(), 2);
    }

    #[test]
    fn test_heartbeat_updates_liveness() {
        let limits = ReducerLimits::default();
        let mut heartbeat = EventEnvelope::heartbeat("task-1", 2500);
        heartbeat.timestamp = 1_700_000_000_123;

        let state = apply(None, heartbeat, &limits);
        assert_eq!(state.last_heartbeat, Some(1_700_000_000_123));
        assert_eq!(state.duration_ms, 2500);
        // Heartbeat alone does not start the subject
        assert_eq!(state.status, ExecutionStatus::Pending);
    }

    #[test]
    fn test_cancelled_records_reason_as_error() {
        let limits = ReducerLimits::default();
        let state = fold(
            vec![
                EventEnvelope::started("task-1", "Build", "agent-1", "api"),
                EventEnvelope::cancelled("task-1", "user request", 3000),
            ],
            &limits,
        );

        assert_eq!(state.status, ExecutionStatus::Cancelled);
        assert_eq!(state.error.as_deref(), Some("user request"));
        assert_eq!(state.duration_ms, 3000);
    }
}
