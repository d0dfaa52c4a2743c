//! Grind: assemble jobs out of asynchronous tasks and stream their results.
//!
//! A [`JobDefinition`] is an ordered, possibly nested, list of [`Task`]s.
//! [`JobService::assemble`] validates and flattens it into numbered steps and
//! returns an [`AssembledJob`], a cold handle that runs the whole job each time
//! it is subscribed. Subscribers receive a [`ResultStream`] of [`JobResult`]s:
//! per step, an optional `STARTED` marker, optional diagnostics, then exactly
//! one `VALUE` or `ERROR`.
//!
//! Steps run strictly one after another. A step only starts once the
//! consumer asks for more results after the previous step's terminal result.

pub mod config;
pub mod context;
pub mod demo;
pub mod error;
pub mod job;
pub mod options;
pub mod report;
pub mod result;
pub mod service;
pub mod step;
pub mod task;

pub use context::{ResolutionContext, ResolutionContextBuilder};
pub use error::{FailureKind, GrindError, TaskError};
pub use job::{JobDefinition, JobEntry};
pub use options::{DiagnosticLevel, ResultOptions};
pub use report::{JobReport, JobStatus, ReportBuilder, StepFailure};
pub use result::{JobResult, Payload, ResultStreamExt, ResultType};
pub use service::{AssembledJob, JobService, ResultStream};
pub use step::{Step, StepInfo, StepStream};
pub use task::{RetryPolicy, Task, TaskContext};
