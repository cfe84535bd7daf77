//! Transport boundary for execution event delivery

use async_trait::async_trait;
use tokio::sync::mpsc;

use rb_core::stream::{EventEnvelope, SubjectInfo};

use crate::error::Result;

/// Capability the adapters consume to receive events and drive subjects.
///
/// `subscribe` hands back the receiving half of a channel; dropping the
/// receiver is the unsubscribe handle. Implementations must deliver a
/// subject's events in the order the backend emitted them; the reducer
/// does not reorder by timestamp.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Subscribe to events for one subject, or to all subjects when `None`
    async fn subscribe(&self, subject: Option<&str>) -> Result<mpsc::Receiver<EventEnvelope>>;

    /// List subjects the backend currently reports as running
    async fn list_active(&self) -> Result<Vec<SubjectInfo>>;

    /// Ask the backend to start the subject
    async fn run(&self, subject_id: &str) -> Result<()>;

    /// Ask the backend to cancel the subject.
    ///
    /// Returns false when there was nothing to cancel.
    async fn cancel(&self, subject_id: &str) -> Result<bool>;
}
