//! Runtime error types.

use thiserror::Error;
use trellis_core::{DispatchError, PatternError};
use trellis_cron::CronError;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Route registration or dispatch failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Scheduling failed.
    #[error(transparent)]
    Cron(#[from] CronError),

    /// An ACL pattern is malformed.
    #[error("Invalid access control pattern: {0}")]
    Pattern(#[from] PatternError),

    /// A queue message could not be decoded.
    #[error("Invalid message on queue '{queue}': {reason}")]
    InvalidMessage { queue: String, reason: String },

    /// No binding exists for the queue.
    #[error("Queue not bound: {0}")]
    UnknownQueue(String),

    /// The server was closed.
    #[error("Server is closed")]
    Closed,
}

impl RuntimeError {
    pub fn invalid_message(queue: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidMessage {
            queue: queue.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
