//! Error types for stream-monitor

use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while monitoring execution streams
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Operation requires a bound subject
    #[error("No subject bound to monitor")]
    NoSubjectBound,

    /// Transport rejected a subscribe/run/cancel operation
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Event channel closed
    #[error("Event channel closed")]
    ChannelClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error
    #[error(transparent)]
    Core(#[from] rb_core::Error),
}

impl MonitorError {
    /// Create a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}
