//! Run options: the diagnostic level and the error policy of a job.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How much progress detail a run emits besides the terminal results.
///
/// Levels are ordered: `None < Info < Trace`. A level enables everything
/// below it.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Terminal `VALUE`/`ERROR` results only.
    #[default]
    None,
    /// Adds a `STARTED` marker per step and task-emitted info diagnostics.
    Info,
    /// Adds task-emitted trace diagnostics and per-step timing.
    Trace,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::None => write!(f, "NONE"),
            DiagnosticLevel::Info => write!(f, "INFO"),
            DiagnosticLevel::Trace => write!(f, "TRACE"),
        }
    }
}

impl FromStr for DiagnosticLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(DiagnosticLevel::None),
            "info" => Ok(DiagnosticLevel::Info),
            "trace" => Ok(DiagnosticLevel::Trace),
            other => Err(format!("unknown diagnostic level '{other}'")),
        }
    }
}

/// Execution configuration fixed for the lifetime of one assembled job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultOptions {
    pub diagnostic_level: DiagnosticLevel,
    /// Stop after the first `ERROR` result instead of running the remaining steps.
    pub halt_on_error: bool,
    /// Upper bound on a single task's execution. `None` leaves it to the task.
    pub step_timeout: Option<Duration>,
}

impl Default for ResultOptions {
    fn default() -> Self {
        Self {
            diagnostic_level: DiagnosticLevel::None,
            halt_on_error: true,
            step_timeout: None,
        }
    }
}

impl ResultOptions {
    pub fn with_diagnostic_level(mut self, level: DiagnosticLevel) -> Self {
        self.diagnostic_level = level;
        self
    }

    pub fn with_halt_on_error(mut self, halt: bool) -> Self {
        self.halt_on_error = halt;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Whether results tagged with `level` pass the configured verbosity.
    pub fn emits(&self, level: DiagnosticLevel) -> bool {
        level != DiagnosticLevel::None && self.diagnostic_level >= level
    }
}
