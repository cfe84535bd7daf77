//! In-process event transport
//!
//! `LocalBus` connects an embedder-owned executor to the adapters in this
//! crate without any IO: the executor publishes envelopes through an
//! [`EventPublisher`], subscribers receive them over bounded channels,
//! and run/cancel requests surface as [`BusCommand`]s for the embedder
//! to drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use rb_core::stream::{EventEnvelope, EventKind, SubjectInfo};

use crate::error::{MonitorError, Result};
use crate::transport::EventTransport;

const EVENT_CHANNEL_CAPACITY: usize = 1000;
const COMMAND_CHANNEL_CAPACITY: usize = 100;

/// A run/cancel request issued against the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCommand {
    Run { subject_id: String },
    Cancel { subject_id: String },
}

struct Subscriber {
    /// None subscribes to every subject (fan-in)
    subject: Option<String>,
    tx: mpsc::Sender<EventEnvelope>,
}

struct BusShared {
    subscribers: RwLock<Vec<Subscriber>>,
    /// Subjects with an observed Started event and no terminal event yet
    active: RwLock<HashMap<String, SubjectInfo>>,
    command_tx: mpsc::Sender<BusCommand>,
    subscription_count: AtomicUsize,
}

impl BusShared {
    /// Keep the active listing in sync with the event flow
    async fn track(&self, envelope: &EventEnvelope) {
        match &envelope.kind {
            EventKind::Started {
                display_name,
                executor_id,
                execution_mode,
            } => {
                let info = SubjectInfo {
                    subject_id: envelope.subject_id.clone(),
                    display_name: display_name.clone(),
                    executor_id: executor_id.clone(),
                    started_at: envelope.timestamp,
                    execution_mode: execution_mode.clone(),
                };
                self.active
                    .write()
                    .await
                    .insert(envelope.subject_id.clone(), info);
            }
            kind if kind.is_terminal() => {
                self.active.write().await.remove(&envelope.subject_id);
            }
            _ => {}
        }
    }

    async fn fan_out(&self, envelope: EventEnvelope) {
        let mut subscribers = self.subscribers.write().await;
        let mut alive = Vec::with_capacity(subscribers.len());

        for subscriber in subscribers.drain(..) {
            let wants = subscriber
                .subject
                .as_deref()
                .is_none_or(|id| id == envelope.subject_id);

            if wants && subscriber.tx.send(envelope.clone()).await.is_err() {
                debug!("Dropping closed event subscriber");
                continue;
            }
            alive.push(subscriber);
        }

        *subscribers = alive;
    }
}

/// Publishing handle for the embedder's executor
#[derive(Clone)]
pub struct EventPublisher {
    shared: Arc<BusShared>,
}

impl EventPublisher {
    /// Deliver one envelope to every matching subscriber
    pub async fn publish(&self, envelope: EventEnvelope) {
        self.shared.track(&envelope).await;
        self.shared.fan_out(envelope).await;
    }
}

/// In-process implementation of [`EventTransport`]
pub struct LocalBus {
    shared: Arc<BusShared>,
    command_rx: std::sync::Mutex<Option<mpsc::Receiver<BusCommand>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(BusShared {
                subscribers: RwLock::new(Vec::new()),
                active: RwLock::new(HashMap::new()),
                command_tx,
                subscription_count: AtomicUsize::new(0),
            }),
            command_rx: std::sync::Mutex::new(Some(command_rx)),
        }
    }

    /// Get a publishing handle for the event-producing side
    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Take the command receiver (can only be called once)
    pub fn take_command_receiver(&self) -> Option<mpsc::Receiver<BusCommand>> {
        self.command_rx
            .lock()
            .ok()
            .and_then(|mut receiver| receiver.take())
    }

    /// Number of subscriptions ever registered
    pub fn subscription_count(&self) -> usize {
        self.shared.subscription_count.load(Ordering::SeqCst)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for LocalBus {
    async fn subscribe(&self, subject: Option<&str>) -> Result<mpsc::Receiver<EventEnvelope>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.shared.subscribers.write().await.push(Subscriber {
            subject: subject.map(str::to_string),
            tx,
        });
        self.shared.subscription_count.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn list_active(&self) -> Result<Vec<SubjectInfo>> {
        let active = self.shared.active.read().await;
        let mut subjects: Vec<SubjectInfo> = active.values().cloned().collect();
        subjects.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(subjects)
    }

    async fn run(&self, subject_id: &str) -> Result<()> {
        self.shared
            .command_tx
            .send(BusCommand::Run {
                subject_id: subject_id.to_string(),
            })
            .await
            .map_err(|_| MonitorError::ChannelClosed)
    }

    async fn cancel(&self, subject_id: &str) -> Result<bool> {
        let is_active = self.shared.active.read().await.contains_key(subject_id);
        self.shared
            .command_tx
            .send(BusCommand::Cancel {
                subject_id: subject_id.to_string(),
            })
            .await
            .map_err(|_| MonitorError::ChannelClosed)?;
        Ok(is_active)
    }
}
