//! Core library for Runboard
//!
//! This crate contains the execution-stream domain model, including:
//! - Event envelopes delivered by the backend transport
//! - Folded per-subject execution state
//! - The pure reducer that turns one into the other

pub mod error;
pub mod stream;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
