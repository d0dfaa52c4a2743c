//! A task bound to its position in a job.
//!
//! [`Step::assemble`] turns one task execution into a cold [`StepStream`]:
//! nothing runs until the stream is first polled. The stream yields
//! an optional `STARTED` marker, any diagnostics the task emits while it
//! runs, and exactly one terminal `VALUE` or `ERROR`.

use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::ResolutionContext;
use crate::error::{FailureKind, TaskError};
use crate::options::{DiagnosticLevel, ResultOptions};
use crate::result::JobResult;
use crate::task::{Diagnostic, Task, TaskContext};

/// Identity of a step within an assembled job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepInfo {
    /// 1-based position in the flattened execution order.
    pub sequence: u32,
    pub description: String,
    /// Name of the innermost job definition the task was declared in.
    pub job: String,
}

impl StepInfo {
    pub fn new(sequence: u32, description: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            sequence,
            description: description.into(),
            job: job.into(),
        }
    }
}

impl fmt::Display for StepInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.sequence, self.description)
    }
}

pub struct Step<T> {
    info: StepInfo,
    task: Arc<dyn Task<T>>,
}

impl<T> Clone for Step<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            task: self.task.clone(),
        }
    }
}

impl<T> fmt::Debug for Step<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step").field("info", &self.info).finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Step<T> {
    pub(crate) fn new(info: StepInfo, task: Arc<dyn Task<T>>) -> Self {
        Self { info, task }
    }

    pub fn info(&self) -> &StepInfo {
        &self.info
    }

    pub fn sequence(&self) -> u32 {
        self.info.sequence
    }

    /// Prepares this step's result stream. The task runs when the stream is polled.
    pub fn assemble(&self, context: Arc<ResolutionContext>, options: &ResultOptions) -> StepStream<T> {
        self.assemble_with_cancel(context, options, CancellationToken::new())
    }

    pub(crate) fn assemble_with_cancel(
        &self,
        context: Arc<ResolutionContext>,
        options: &ResultOptions,
        cancel: CancellationToken,
    ) -> StepStream<T> {
        StepStream {
            info: self.info.clone(),
            task: self.task.clone(),
            context,
            options: options.clone(),
            cancel,
            state: StepState::Pending,
        }
    }
}

/// Settled task output, or `None` when the run was cancelled first.
type Execution<T> = BoxFuture<'static, Option<Result<T, TaskError>>>;

enum StepState<T> {
    Pending,
    Running {
        execution: Execution<T>,
        diagnostics: UnboundedReceiver<Diagnostic>,
        started: Instant,
    },
    Draining(VecDeque<JobResult<T>>),
    Done,
}

/// Result sub-stream of a single step.
pub struct StepStream<T> {
    info: StepInfo,
    task: Arc<dyn Task<T>>,
    context: Arc<ResolutionContext>,
    options: ResultOptions,
    cancel: CancellationToken,
    state: StepState<T>,
}

// No field is structurally pinned; the task future lives in its own box.
impl<T> Unpin for StepStream<T> {}

impl<T: Send + 'static> StepStream<T> {
    pub fn info(&self) -> &StepInfo {
        &self.info
    }

    fn start(&mut self) {
        debug!(
            job = %self.info.job,
            sequence = self.info.sequence,
            description = %self.info.description,
            "starting step"
        );
        let (tx, rx) = unbounded_channel();
        let ctx = TaskContext::new(
            self.info.clone(),
            self.context.clone(),
            self.options.diagnostic_level,
            tx,
            self.cancel.child_token(),
        );
        let task = self.task.clone();
        let timeout = self.options.step_timeout;
        let cancel = self.cancel.clone();

        let execution = async move {
            let run = AssertUnwindSafe(task.execute(ctx)).catch_unwind();
            let settled = async move {
                let outcome = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(outcome) => outcome,
                        Err(_) => return Err(timed_out(limit)),
                    },
                    None => run.await,
                };
                outcome.unwrap_or_else(|panic| Err(TaskError::panicked(panic)))
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcome = settled => Some(outcome),
            }
        }
        .boxed();

        self.state = StepState::Running {
            execution,
            diagnostics: rx,
            started: Instant::now(),
        };
    }

    fn finish(
        &self,
        outcome: Result<T, TaskError>,
        mut diagnostics: UnboundedReceiver<Diagnostic>,
        elapsed: Duration,
    ) -> VecDeque<JobResult<T>> {
        let mut queue = VecDeque::new();
        // Diagnostics sent before the task settled still precede its terminal result.
        while let Ok(diagnostic) = diagnostics.try_recv() {
            queue.push_back(self.diagnostic(diagnostic));
        }
        if self.options.emits(DiagnosticLevel::Trace) {
            queue.push_back(JobResult::diagnostic(
                self.info.clone(),
                DiagnosticLevel::Trace,
                format!("step finished in {}ms", elapsed.as_millis()),
            ));
        }
        match &outcome {
            Ok(_) => debug!(
                job = %self.info.job,
                sequence = self.info.sequence,
                elapsed_ms = elapsed.as_millis() as u64,
                "step succeeded"
            ),
            Err(err) => warn!(
                job = %self.info.job,
                sequence = self.info.sequence,
                kind = %err.kind,
                error = %err.message,
                "step failed"
            ),
        }
        queue.push_back(JobResult::terminal(self.info.clone(), outcome));
        queue
    }

    fn diagnostic(&self, diagnostic: Diagnostic) -> JobResult<T> {
        JobResult::diagnostic(self.info.clone(), diagnostic.level, diagnostic.message)
    }
}

impl<T> Drop for StepStream<T> {
    fn drop(&mut self) {
        if matches!(self.state, StepState::Running { .. }) {
            // Reaches the child token held by the in-flight task.
            self.cancel.cancel();
        }
    }
}

fn timed_out(limit: Duration) -> TaskError {
    TaskError::new(
        FailureKind::TimedOut,
        format!("task did not settle within {}ms", limit.as_millis()),
    )
}

impl<T: Send + 'static> Stream for StepStream<T> {
    type Item = JobResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                StepState::Pending => {
                    this.start();
                    if this.options.emits(DiagnosticLevel::Info) {
                        return Poll::Ready(Some(JobResult::started(this.info.clone())));
                    }
                }
                StepState::Running {
                    execution,
                    diagnostics,
                    started,
                } => {
                    if let Poll::Ready(Some(diagnostic)) = diagnostics.poll_recv(cx) {
                        return Poll::Ready(Some(this.diagnostic(diagnostic)));
                    }
                    match execution.poll_unpin(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            debug!(
                                job = %this.info.job,
                                sequence = this.info.sequence,
                                "step cancelled before settling"
                            );
                            this.state = StepState::Done;
                        }
                        Poll::Ready(Some(outcome)) => {
                            let elapsed = started.elapsed();
                            let StepState::Running { diagnostics, .. } =
                                std::mem::replace(&mut this.state, StepState::Done)
                            else {
                                unreachable!("state checked above");
                            };
                            this.state = StepState::Draining(this.finish(outcome, diagnostics, elapsed));
                        }
                    }
                }
                StepState::Draining(queue) => match queue.pop_front() {
                    Some(result) => return Poll::Ready(Some(result)),
                    None => this.state = StepState::Done,
                },
                StepState::Done => return Poll::Ready(None),
            }
        }
    }
}
