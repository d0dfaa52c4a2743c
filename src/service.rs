//! Assembles job definitions and drives their steps in order.
//!
//! [`JobService::assemble`] validates and flattens a definition up front,
//! then hands back an [`AssembledJob`]. Nothing executes until a
//! [`ResultStream`] obtained from [`AssembledJob::subscribe`] is polled.
//! Each subscription re-runs the job from step 1.
//!
//! Steps run strictly one after another. Step `k + 1` starts only when the
//! consumer polls after step `k`'s terminal result, so a slow consumer
//! naturally holds the job back.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::ResolutionContext;
use crate::error::GrindError;
use crate::job::JobDefinition;
use crate::options::ResultOptions;
use crate::report::{JobReport, ReportBuilder};
use crate::result::{JobResult, Payload, ResultType};
use crate::step::{Step, StepStream};

/// Entry point used by provisioning services to run job definitions.
///
/// Holds the collaborator registry handed to every task. Separate
/// `assemble` calls share nothing mutable.
#[derive(Debug, Clone, Default)]
pub struct JobService {
    context: Arc<ResolutionContext>,
}

impl JobService {
    pub fn new(context: ResolutionContext) -> Self {
        Self::with_shared_context(Arc::new(context))
    }

    pub fn with_shared_context(context: Arc<ResolutionContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// Flattens `job` and binds it to `options`.
    ///
    /// Malformed definitions fail here, before any task runs.
    pub fn assemble<T: Send + 'static>(
        &self,
        job: &JobDefinition<T>,
        options: ResultOptions,
    ) -> Result<AssembledJob<T>, GrindError> {
        let steps = job.flatten()?;
        info!(
            job = %job.name(),
            steps = steps.len(),
            diagnostic_level = %options.diagnostic_level,
            halt_on_error = options.halt_on_error,
            "assembled job"
        );
        Ok(AssembledJob {
            job: job.name().to_string(),
            steps: steps.into(),
            context: self.context.clone(),
            options,
        })
    }

    /// [`assemble`](Self::assemble) with [`ResultOptions::default`].
    pub fn assemble_default<T: Send + 'static>(&self, job: &JobDefinition<T>) -> Result<AssembledJob<T>, GrindError> {
        self.assemble(job, ResultOptions::default())
    }
}

/// A flattened job ready to run. Cloning is cheap.
pub struct AssembledJob<T> {
    job: String,
    steps: Arc<[Step<T>]>,
    context: Arc<ResolutionContext>,
    options: ResultOptions,
}

impl<T> Clone for AssembledJob<T> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            steps: self.steps.clone(),
            context: self.context.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for AssembledJob<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledJob")
            .field("job", &self.job)
            .field("steps", &self.steps.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> AssembledJob<T> {
    pub fn name(&self) -> &str {
        &self.job
    }

    pub fn steps(&self) -> &[Step<T>] {
        &self.steps
    }

    pub fn options(&self) -> &ResultOptions {
        &self.options
    }

    /// Starts a fresh, cold run of the whole job.
    pub fn subscribe(&self) -> ResultStream<T> {
        ResultStream {
            job: self.job.clone(),
            steps: self.steps.clone(),
            context: self.context.clone(),
            options: self.options.clone(),
            cancel: CancellationToken::new(),
            next_step: 0,
            current: None,
            finished: false,
        }
    }

    /// Runs the job to completion and summarises it.
    pub async fn run_to_report(&self) -> JobReport {
        let mut report = ReportBuilder::new(&self.job, self.steps.len());
        let mut results = self.subscribe();
        while let Some(result) = results.next().await {
            report.observe(&result);
        }
        report.finish()
    }

    /// Runs the job to completion and returns the last value produced.
    ///
    /// A run in which any step failed yields the first failure as
    /// [`GrindError::StepFailed`], even when `halt_on_error` is off.
    pub async fn last_value(&self) -> Result<Option<T>, GrindError> {
        let mut results = self.subscribe();
        let mut last = None;
        let mut failure = None;
        while let Some(result) = results.next().await {
            match result.payload {
                Payload::Value { value } => last = Some(value),
                Payload::Error { error } if failure.is_none() => {
                    failure = Some(GrindError::StepFailed {
                        sequence: result.step.sequence,
                        description: result.step.description,
                        error,
                    });
                }
                _ => {}
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(last),
        }
    }

    /// Blocking variant of [`last_value`](Self::last_value) for callers
    /// outside an async runtime. Must not be called from within one.
    pub fn blocking_last_value(&self) -> Result<Option<T>, GrindError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.last_value())
    }
}

/// Ordered concatenation of every executed step's results.
///
/// Dropping the stream, or cancelling the token from
/// [`cancel_handle`](Self::cancel_handle), interrupts the in-flight task and
/// prevents any further step from starting.
pub struct ResultStream<T> {
    job: String,
    steps: Arc<[Step<T>]>,
    context: Arc<ResolutionContext>,
    options: ResultOptions,
    cancel: CancellationToken,
    next_step: usize,
    current: Option<StepStream<T>>,
    finished: bool,
}

impl<T> Unpin for ResultStream<T> {}

impl<T> ResultStream<T> {
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Number of steps started so far.
    pub fn steps_started(&self) -> usize {
        self.next_step
    }
}

impl<T> Drop for ResultStream<T> {
    fn drop(&mut self) {
        if !self.finished {
            // Reaches the child token held by the in-flight task.
            self.cancel.cancel();
        }
    }
}

impl<T: Send + 'static> Stream for ResultStream<T> {
    type Item = JobResult<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            if this.cancel.is_cancelled() {
                debug!(job = %this.job, steps_started = this.next_step, "job cancelled");
                this.current = None;
                this.finished = true;
                return Poll::Ready(None);
            }

            if let Some(current) = this.current.as_mut() {
                match current.poll_next_unpin(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Some(result)) => {
                        if result.is_terminal() {
                            this.current = None;
                            if result.result_type() == ResultType::Error && this.options.halt_on_error {
                                info!(
                                    job = %this.job,
                                    sequence = result.sequence(),
                                    skipped = this.steps.len() - this.next_step,
                                    "halting job after step error"
                                );
                                this.finished = true;
                            }
                        }
                        return Poll::Ready(Some(result));
                    }
                    // Only reachable when the step observed cancellation itself.
                    Poll::Ready(None) => this.current = None,
                }
                continue;
            }

            match this.steps.get(this.next_step) {
                Some(step) => {
                    this.current = Some(step.assemble_with_cancel(
                        this.context.clone(),
                        &this.options,
                        this.cancel.child_token(),
                    ));
                    this.next_step += 1;
                }
                None => {
                    debug!(job = %this.job, steps = this.steps.len(), "job finished");
                    this.finished = true;
                }
            }
        }
    }
}
