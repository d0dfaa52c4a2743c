//! End-of-run audit record built from a job's result stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::result::{JobResult, Payload};

/// Final status of one run of an assembled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Every step ran and produced a value.
    Completed,
    /// At least one step produced an error, whether or not the run continued.
    Failed,
    /// The run ended before every step ran, with no error observed.
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub sequence: u32,
    pub description: String,
    pub error: TaskError,
}

/// Structured audit record produced at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub run_id: String,
    pub job: String,
    pub status: JobStatus,
    pub steps_total: usize,
    pub steps_executed: usize,
    pub errors: Vec<StepFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Accumulates a [`JobReport`] while a result stream is consumed.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: String,
    job: String,
    steps_total: usize,
    steps_executed: usize,
    errors: Vec<StepFailure>,
    started_at: DateTime<Utc>,
}

impl ReportBuilder {
    pub fn new(job: &str, steps_total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            job: job.to_string(),
            steps_total,
            steps_executed: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn observe<T>(&mut self, result: &JobResult<T>) {
        match &result.payload {
            Payload::Value { .. } => self.steps_executed += 1,
            Payload::Error { error } => {
                self.steps_executed += 1;
                self.errors.push(StepFailure {
                    sequence: result.step.sequence,
                    description: result.step.description.clone(),
                    error: error.clone(),
                });
            }
            Payload::Started | Payload::Diagnostic { .. } => {}
        }
    }

    pub fn finish(self) -> JobReport {
        let status = if !self.errors.is_empty() {
            JobStatus::Failed
        } else if self.steps_executed < self.steps_total {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        let completed_at = Utc::now();

        JobReport {
            run_id: self.run_id,
            job: self.job,
            status,
            steps_total: self.steps_total,
            steps_executed: self.steps_executed,
            errors: self.errors,
            started_at: self.started_at,
            completed_at,
            duration_ms: (completed_at - self.started_at).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepInfo;

    fn info(sequence: u32) -> StepInfo {
        StepInfo::new(sequence, format!("step {sequence}"), "report")
    }

    #[test]
    fn completed_when_every_step_has_a_value() {
        let mut builder = ReportBuilder::new("report", 2);
        builder.observe(&JobResult::<u8>::started(info(1)));
        builder.observe(&JobResult::terminal(info(1), Ok::<u8, TaskError>(1)));
        builder.observe(&JobResult::terminal(info(2), Ok::<u8, TaskError>(2)));
        let report = builder.finish();

        assert_eq!(report.status, JobStatus::Completed);
        assert!(report.succeeded());
        assert_eq!(report.steps_executed, 2);
        assert!(report.errors.is_empty());
        assert!(report.duration_ms >= 0);
    }

    #[test]
    fn failed_when_any_step_errors() {
        let mut builder = ReportBuilder::new("report", 3);
        builder.observe(&JobResult::terminal(info(1), Ok::<u8, _>(1)));
        builder.observe(&JobResult::terminal(info(2), Err::<u8, _>(TaskError::business("quota exceeded"))));
        let report = builder.finish();

        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.steps_executed, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].sequence, 2);
        assert_eq!(report.errors[0].description, "step 2");
    }

    #[test]
    fn cancelled_when_run_stops_early_without_errors() {
        let mut builder = ReportBuilder::new("report", 3);
        builder.observe(&JobResult::terminal(info(1), Ok::<_, TaskError>("x")));
        assert_eq!(builder.finish().status, JobStatus::Cancelled);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = ReportBuilder::new("kafka", 0).finish();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["job"], "kafka");
        assert_eq!(json["status"], "Completed");
        assert!(Uuid::parse_str(json["run_id"].as_str().unwrap()).is_ok());
    }
}
