//! Multi-subject registry - fan-in over the all-subjects event channel

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use rb_core::stream::{apply, ExecutionState, ReducerLimits};

use crate::error::Result;
use crate::event_log::EventLogStore;
use crate::transport::EventTransport;

/// Tracks every subject seen on the transport's all-subjects channel.
///
/// One subscription, demultiplexed per subject id through the same
/// reducer the single-subject adapter uses. The pump task is the only
/// writer of the map; callers observe read-only snapshots.
pub struct ExecutionRegistry {
    transport: Arc<dyn EventTransport>,
    limits: ReducerLimits,
    states: Arc<RwLock<HashMap<String, ExecutionState>>>,
    event_log: Option<Arc<EventLogStore>>,
    listener: Option<JoinHandle<()>>,
}

impl ExecutionRegistry {
    /// Create a registry with default limits
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self::with_limits(transport, ReducerLimits::default())
    }

    /// Create a registry with explicit reducer limits
    pub fn with_limits(transport: Arc<dyn EventTransport>, limits: ReducerLimits) -> Self {
        Self {
            transport,
            limits,
            states: Arc::new(RwLock::new(HashMap::new())),
            event_log: None,
            listener: None,
        }
    }

    /// Persist every demultiplexed envelope into the given event log.
    ///
    /// Append failures are logged and never disturb the fold.
    pub fn with_event_log(mut self, event_log: EventLogStore) -> Self {
        self.event_log = Some(Arc::new(event_log));
        self
    }

    /// Check if the pump task is alive
    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Subscribe to the all-subjects channel and start demultiplexing.
    ///
    /// Idempotent. On start the transport's active listing is queried and
    /// a running placeholder is seeded for every subject not yet tracked,
    /// reconciling subjects that started before this registry attached.
    pub async fn start_listening(&mut self) -> Result<()> {
        if self.is_listening() {
            return Ok(());
        }

        let mut events = self.transport.subscribe(None).await?;

        let active = self.transport.list_active().await?;
        if !active.is_empty() {
            let mut states = self.states.write().await;
            for info in &active {
                states
                    .entry(info.subject_id.clone())
                    .or_insert_with(|| ExecutionState::placeholder(info));
            }
            debug!(count = active.len(), "Seeded active subjects from transport listing");
        }

        let states = Arc::clone(&self.states);
        let limits = self.limits.clone();
        let event_log = self.event_log.clone();
        let handle = tokio::spawn(async move {
            while let Some(envelope) = events.recv().await {
                if let Some(log) = &event_log {
                    if let Err(error) = log.append(&envelope) {
                        warn!(
                            subject_id = %envelope.subject_id,
                            error = %error,
                            "Failed to append event to log"
                        );
                    }
                }

                let mut states = states.write().await;
                let previous = states.remove(&envelope.subject_id);
                let next = apply(previous, envelope, &limits);
                states.insert(next.subject_id.clone(), next);
            }
            debug!("All-subjects event stream closed");
        });
        self.listener = Some(handle);

        Ok(())
    }

    /// Stop listening; tracked state is kept. No-op when not listening.
    pub fn stop_listening(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }

    /// Snapshot of one subject's state; `None` when untracked
    pub async fn get_state(&self, subject_id: &str) -> Option<ExecutionState> {
        self.states.read().await.get(subject_id).cloned()
    }

    /// Ids of all tracked subjects
    pub async fn subject_ids(&self) -> Vec<String> {
        self.states.read().await.keys().cloned().collect()
    }

    /// Number of tracked subjects
    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }

    /// Snapshots of all subjects with status running
    pub async fn running_subjects(&self) -> Vec<ExecutionState> {
        self.states
            .read()
            .await
            .values()
            .filter(|state| state.is_running())
            .cloned()
            .collect()
    }

    /// Snapshots of all subjects with a terminal status
    pub async fn finished_subjects(&self) -> Vec<ExecutionState> {
        self.states
            .read()
            .await
            .values()
            .filter(|state| state.is_finished())
            .cloned()
            .collect()
    }

    pub async fn running_count(&self) -> usize {
        self.states
            .read()
            .await
            .values()
            .filter(|state| state.is_running())
            .count()
    }

    pub async fn finished_count(&self) -> usize {
        self.states
            .read()
            .await
            .values()
            .filter(|state| state.is_finished())
            .count()
    }

    /// Evict one subject regardless of status.
    ///
    /// Returns false when the id was untracked (a no-op, not an error).
    pub async fn remove_subject(&self, subject_id: &str) -> bool {
        self.states.write().await.remove(subject_id).is_some()
    }

    /// Evict every subject with a terminal status; running and pending
    /// entries are preserved. Returns the number of evicted entries.
    pub async fn clear_finished(&self) -> usize {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, state| !state.is_finished());
        before - states.len()
    }
}

impl Drop for ExecutionRegistry {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
