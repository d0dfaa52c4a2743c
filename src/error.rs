//! Error types for job assembly and task execution.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while assembling or driving a job.
///
/// Assembly variants are returned synchronously from `JobService::assemble`.
/// `StepFailed` summarises a run for callers that only want its final value.
/// None of them appear inside a result stream.
#[derive(Debug, Error)]
pub enum GrindError {
    #[error("Job '{job}' has no tasks to run")]
    EmptyJob { job: String },

    #[error("Job definitions require a non-empty name")]
    BlankJobName,

    #[error("Task {position} of job '{job}' has a blank description")]
    BlankDescription { job: String, position: usize },

    #[error("Step {sequence} ({description}) failed: {error}")]
    StepFailed {
        sequence: u32,
        description: String,
        #[source]
        error: TaskError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifies a task failure so consumers can tell a rejected operation
/// from a broken environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The task's own logic rejected the work (quota exceeded, invalid input).
    Business,
    /// Infrastructure failed (API timeout, network error, missing collaborator).
    System,
    /// The task panicked while executing.
    Panicked,
    /// The task did not settle within the configured step timeout.
    TimedOut,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "Business"),
            FailureKind::System => write!(f, "System"),
            FailureKind::Panicked => write!(f, "Panic"),
            FailureKind::TimedOut => write!(f, "Timeout"),
        }
    }
}

/// The failure detail carried by an `ERROR` result.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure: {message}")]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Business, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(FailureKind::System, message)
    }

    pub(crate) fn panicked(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked".to_string()
        };
        Self::new(FailureKind::Panicked, message)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        // Alternate formatting keeps the context chain in one line.
        TaskError::system(format!("{err:#}"))
    }
}
