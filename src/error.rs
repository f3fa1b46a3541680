//! Error handling types for offload
//!
//! Per-call failures never show up here: they travel back to the caller as a
//! failed [`Response`](crate::envelope::Response) value. The types in this
//! module describe failures of the broker, the worker process itself, or the
//! handler registry.

use std::sync::PoisonError;
use std::time::Duration;

use thiserror::Error;

use crate::envelope::CallKey;

/// Failures of the broker side: spawning, transport and waiting.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The worker process could not be spawned
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker started but never completed the ready handshake
    #[error("Worker failed to start: {0}")]
    Startup(String),

    /// The worker process exited or its channel closed
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// No response arrived within the configured call timeout
    #[error("Call {key} timed out after {elapsed:?}")]
    Timeout { key: CallKey, elapsed: Duration },

    /// Writing to the worker's channel failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The task running a submission panicked or was aborted
    #[error("Submission task failed: {0}")]
    TaskFailed(String),
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Create a startup error
    pub fn startup(message: impl Into<String>) -> Self {
        BrokerError::Startup(message.into())
    }

    /// Create a worker unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        BrokerError::WorkerUnavailable(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        BrokerError::Transport(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BrokerError::Config(message.into())
    }
}

/// Failures of the message framing layer.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing Content-Length header, got: {0:?}")]
    MissingContentLength(String),

    #[error("Invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),

    #[error("Expected empty separator line, got: {0:?}")]
    InvalidSeparator(String),

    #[error("Malformed message body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures that stop the worker runtime.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The handler factory failed; no call can be served
    #[error("Handler factory failed: {0}")]
    Factory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}

/// Rejected handler registrations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handler name must not be empty")]
    EmptyName,

    #[error("Handler already registered: {0}")]
    Duplicate(String),
}

/// Helper trait to recover a guard from a poisoned lock.
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation
    /// triggered the recovery.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "offload::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
