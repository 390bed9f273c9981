//! # Structured Error Handling
//!
//! Top-level error type for the relay core. Component-specific taxonomies
//! (messaging, sink) live next to their components and convert into
//! [`CoreError`] at module boundaries.

use thiserror::Error;

use crate::messaging::MessagingError;
use crate::sink::SinkError;

/// Top-level error for supervisor and binary entry points
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Worker spawn error: {0}")]
    WorkerSpawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a supervisor error
    pub fn supervisor(message: impl Into<String>) -> Self {
        Self::Supervisor(message.into())
    }

    /// Create a worker spawn error
    pub fn worker_spawn(message: impl Into<String>) -> Self {
        Self::WorkerSpawn(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
