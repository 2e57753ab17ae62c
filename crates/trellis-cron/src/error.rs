//! Error types for the scheduler.

use thiserror::Error;
use trellis_core::DispatchError;

/// Errors produced by the time-wheel scheduler.
#[derive(Debug, Clone, Error)]
pub enum CronError {
    /// The schedule expression is malformed or yields no future fire time.
    #[error("invalid schedule '{expr}' for task '{task}': {reason}")]
    InvalidSchedule {
        task: String,
        expr: String,
        reason: String,
    },

    /// Registering the task's route failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Wheel dimensions must be non-zero.
    #[error("invalid wheel: span and length must be non-zero")]
    InvalidWheel,

    /// The processor was closed.
    #[error("processor is closed")]
    Closed,

    /// Some tasks of one `add` call were rejected; the rest were scheduled.
    #[error("{} task(s) rejected: {}", .0.len(), describe(.0))]
    Rejected(Vec<TaskFailure>),

    /// An unexpected condition inside the wheel.
    #[error("internal fault: {0}")]
    Internal(String),
}

/// One task rejected by an `add` call.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: String,
    pub error: Box<CronError>,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.task, self.error)
    }
}

fn describe(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CronError {
    /// Failures carried by [`CronError::Rejected`], empty otherwise.
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            Self::Rejected(failures) => failures,
            _ => &[],
        }
    }
}

/// Result type for scheduler operations.
pub type CronResult<T> = Result<T, CronError>;
