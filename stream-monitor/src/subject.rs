//! Single-subject subscription adapter

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use rb_core::stream::{apply, ExecutionState, ExecutionStatus, ReducerLimits};

use crate::error::{MonitorError, Result};
use crate::transport::EventTransport;

/// Binds one transport subscription to one [`ExecutionState`].
///
/// The spawned pump task is the only writer of the state slot; callers
/// observe read-only snapshots. Dropping the monitor (or calling
/// [`stop_listening`](Self::stop_listening)) tears the subscription down
/// so no orphaned listener keeps writing after the owner is gone.
pub struct SubjectMonitor {
    transport: Arc<dyn EventTransport>,
    limits: ReducerLimits,
    subject_id: Option<String>,
    state: Arc<RwLock<Option<ExecutionState>>>,
    listener: Option<JoinHandle<()>>,
}

impl SubjectMonitor {
    /// Create a monitor with default limits and no subject bound
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self::with_limits(transport, ReducerLimits::default())
    }

    /// Create a monitor with explicit reducer limits
    pub fn with_limits(transport: Arc<dyn EventTransport>, limits: ReducerLimits) -> Self {
        Self {
            transport,
            limits,
            subject_id: None,
            state: Arc::new(RwLock::new(None)),
            listener: None,
        }
    }

    /// Create a monitor already bound to a subject
    pub fn for_subject(transport: Arc<dyn EventTransport>, subject_id: impl Into<String>) -> Self {
        let mut monitor = Self::new(transport);
        monitor.bind(subject_id);
        monitor
    }

    /// Bind the monitor to a subject
    pub fn bind(&mut self, subject_id: impl Into<String>) {
        self.subject_id = Some(subject_id.into());
    }

    /// The bound subject id, if any
    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    /// Check if the pump task is alive
    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Subscribe to the bound subject and start folding its events.
    ///
    /// Idempotent: a live listener or an unbound monitor makes this a
    /// no-op. On success the state is re-initialized to pending; a
    /// subscribe failure propagates and leaves existing state untouched.
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.is_listening() {
            return Ok(());
        }
        let Some(subject_id) = self.subject_id.clone() else {
            return Ok(());
        };

        let mut events = self.transport.subscribe(Some(&subject_id)).await?;

        *self.state.write().await = Some(ExecutionState::new(subject_id.clone()));

        let state = Arc::clone(&self.state);
        let limits = self.limits.clone();
        let handle = tokio::spawn(async move {
            while let Some(envelope) = events.recv().await {
                let mut slot = state.write().await;
                let previous = slot.take();
                *slot = Some(apply(previous, envelope, &limits));
            }
            debug!(subject_id = %subject_id, "Event stream closed");
        });
        self.listener = Some(handle);

        Ok(())
    }

    /// Stop listening; accumulated state is kept. No-op when not listening.
    pub fn stop_listening(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }

    /// Stop listening and discard accumulated state
    pub async fn reset(&mut self) {
        self.stop_listening();
        *self.state.write().await = None;
    }

    /// Start listening, then ask the backend to run the bound subject.
    ///
    /// Listening is established first so no event can slip between the
    /// run acknowledgement and the subscription.
    pub async fn run(&mut self) -> Result<()> {
        let subject_id = self
            .subject_id
            .clone()
            .ok_or(MonitorError::NoSubjectBound)?;

        self.start_listening().await?;
        self.transport.run(&subject_id).await
    }

    /// Ask the backend to cancel the subject.
    ///
    /// Only issued while the subject is running; otherwise returns
    /// `Ok(false)` without touching the transport.
    pub async fn cancel(&self) -> Result<bool> {
        let Some(subject_id) = self.subject_id.as_deref() else {
            return Ok(false);
        };
        if !self.is_running().await {
            return Ok(false);
        }
        self.transport.cancel(subject_id).await
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> Option<ExecutionState> {
        self.state.read().await.clone()
    }

    /// Current status, if any state has been accumulated
    pub async fn status(&self) -> Option<ExecutionStatus> {
        self.state.read().await.as_ref().map(|state| state.status)
    }

    pub async fn is_running(&self) -> bool {
        self.status().await == Some(ExecutionStatus::Running)
    }

    pub async fn is_completed(&self) -> bool {
        self.status().await == Some(ExecutionStatus::Completed)
    }

    pub async fn is_failed(&self) -> bool {
        self.status().await == Some(ExecutionStatus::Failed)
    }

    pub async fn is_cancelled(&self) -> bool {
        self.status().await == Some(ExecutionStatus::Cancelled)
    }

    /// Check if the subject reached any terminal status
    pub async fn is_finished(&self) -> bool {
        self.status().await.is_some_and(|status| status.is_terminal())
    }

    /// Ordered join of the buffered output line text
    pub async fn combined_output(&self) -> String {
        self.state
            .read()
            .await
            .as_ref()
            .map(ExecutionState::combined_output)
            .unwrap_or_default()
    }

    /// Number of buffered output lines
    pub async fn output_line_count(&self) -> usize {
        self.state
            .read()
            .await
            .as_ref()
            .map(ExecutionState::output_line_count)
            .unwrap_or(0)
    }
}

impl Drop for SubjectMonitor {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
