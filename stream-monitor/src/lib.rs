//! Stream Monitor - subscription adapters for live execution streams
//!
//! This crate binds the pure reducer in `rb-core` to an event transport:
//! a single-subject monitor for detail views, a fan-in registry for
//! boards tracking every running subject, and transports for in-process
//! and remote backends.

mod bus;
mod error;
mod event_log;
mod registry;
mod remote;
mod subject;
mod transport;

pub use bus::{BusCommand, EventPublisher, LocalBus};
pub use error::{MonitorError, Result};
pub use event_log::EventLogStore;
pub use registry::ExecutionRegistry;
pub use remote::RemoteTransport;
pub use subject::SubjectMonitor;
pub use transport::EventTransport;
