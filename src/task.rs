//! The smallest unit of work in a job.
//!
//! A [`Task`] produces a value (or a [`TaskError`]) given a [`TaskContext`].
//! Most jobs are built from the helpers in this module:
//!
//! - [`value`] wraps a constant as a pass-through task that ignores the context.
//! - [`from_fn`] wraps an async closure.
//! - [`retry`] wraps another task and retries system failures with
//!   exponential backoff, for tasks that poll flaky cloud APIs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::context::ResolutionContext;
use crate::error::{FailureKind, TaskError};
use crate::options::DiagnosticLevel;
use crate::step::StepInfo;

/// A unit of work executed at most once per step subscription.
///
/// Implementations must not assume anything about which thread polls them;
/// long blocking work belongs in `tokio::task::spawn_blocking`.
#[async_trait]
pub trait Task<T>: Send + Sync {
    fn description(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, ctx: TaskContext) -> Result<T, TaskError>;
}

#[derive(Debug, Clone)]
pub(crate) struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Per-execution handle given to a task.
///
/// Carries the step's identity, the shared collaborator registry and the
/// diagnostic channel back to the step's result stream.
#[derive(Debug, Clone)]
pub struct TaskContext {
    step: StepInfo,
    resolution: Arc<ResolutionContext>,
    level: DiagnosticLevel,
    diagnostics: Option<UnboundedSender<Diagnostic>>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(
        step: StepInfo,
        resolution: Arc<ResolutionContext>,
        level: DiagnosticLevel,
        diagnostics: UnboundedSender<Diagnostic>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            step,
            resolution,
            level,
            diagnostics: Some(diagnostics),
            cancel,
        }
    }

    /// A context not attached to any job run. Diagnostics are discarded.
    ///
    /// Useful for exercising a task directly in tests.
    pub fn detached(resolution: ResolutionContext) -> Self {
        Self {
            step: StepInfo::new(1, "detached", "detached"),
            resolution: Arc::new(resolution),
            level: DiagnosticLevel::None,
            diagnostics: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn step(&self) -> &StepInfo {
        &self.step
    }

    pub fn resolution(&self) -> &ResolutionContext {
        &self.resolution
    }

    pub fn resolve<C: std::any::Any + Send + Sync>(&self) -> Result<Arc<C>, TaskError> {
        self.resolution.require::<C>()
    }

    pub fn resolve_named<C: std::any::Any + Send + Sync>(&self, name: &str) -> Result<Arc<C>, TaskError> {
        self.resolution.require_named::<C>(name)
    }

    /// Emits an info-level diagnostic if the run's verbosity allows it.
    pub fn info(&self, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Info, message.into());
    }

    /// Emits a trace-level diagnostic if the run's verbosity allows it.
    pub fn trace(&self, message: impl Into<String>) {
        self.emit(DiagnosticLevel::Trace, message.into());
    }

    pub fn diagnostic_level(&self) -> DiagnosticLevel {
        self.level
    }

    /// Token cancelled when the consumer abandons the run.
    ///
    /// Work the task hands to other threads should watch it; work on the
    /// task's own future is dropped automatically.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, level: DiagnosticLevel, message: String) {
        if self.level < level {
            return;
        }
        if let Some(tx) = &self.diagnostics {
            // The receiver is gone once the step finished or was cancelled.
            let _ = tx.send(Diagnostic { level, message });
        }
    }
}

/// Pass-through task returning a pre-supplied constant.
#[derive(Debug, Clone)]
pub struct ValueTask<T> {
    value: T,
    description: Option<String>,
}

impl<T> ValueTask<T> {
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl<T> Task<T> for ValueTask<T>
where
    T: Clone + Send + Sync,
{
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn execute(&self, _ctx: TaskContext) -> Result<T, TaskError> {
        Ok(self.value.clone())
    }
}

pub fn value<T>(value: T) -> ValueTask<T> {
    ValueTask {
        value,
        description: None,
    }
}

/// Task backed by an async closure.
pub struct FnTask<F> {
    f: F,
    description: Option<String>,
}

impl<F> FnTask<F> {
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[async_trait]
impl<T, F, Fut> Task<T> for FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, TaskError>> + Send,
{
    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn execute(&self, ctx: TaskContext) -> Result<T, TaskError> {
        (self.f)(ctx).await
    }
}

pub fn from_fn<T, F, Fut>(f: F) -> FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, TaskError>> + Send,
{
    FnTask { f, description: None }
}

/// Backoff settings for [`retry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt before the failure is reported.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1))
    }
}

/// Wraps a task so transient failures are retried inside the step.
///
/// Only `System` failures are retried; a business failure (quota exceeded,
/// invalid request) is reported on the first occurrence.
pub struct RetryTask<T> {
    inner: Arc<dyn Task<T>>,
    policy: RetryPolicy,
}

pub fn retry<T>(inner: impl Task<T> + 'static, policy: RetryPolicy) -> RetryTask<T> {
    RetryTask {
        inner: Arc::new(inner),
        policy,
    }
}

#[async_trait]
impl<T: Send> Task<T> for RetryTask<T> {
    fn description(&self) -> Option<&str> {
        self.inner.description()
    }

    async fn execute(&self, ctx: TaskContext) -> Result<T, TaskError> {
        let mut attempt = 0;
        loop {
            match self.inner.execute(ctx.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind == FailureKind::System && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay_ms = self.policy.delay_for_attempt(attempt);
                    ctx.trace(format!(
                        "retry {attempt}/{}: {} (waiting {delay_ms}ms)",
                        self.policy.max_retries, err.message
                    ));
                    tracing::debug!(
                        sequence = ctx.step().sequence,
                        attempt,
                        delay_ms,
                        "retrying task after system failure"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
