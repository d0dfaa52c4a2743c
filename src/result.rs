//! Observable events produced while a job runs.
//!
//! Every step yields zero or more progress results (`STARTED`, `DIAGNOSTIC`)
//! followed by exactly one terminal result (`VALUE` or `ERROR`).
//! [`ResultStreamExt`] adds the filtering helpers callers typically need on
//! top of any stream of [`JobResult`]s.

use std::fmt;
use std::future::{Future, ready};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::options::DiagnosticLevel;
use crate::step::StepInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    Started,
    Diagnostic,
    Value,
    Error,
}

impl ResultType {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResultType::Value | ResultType::Error)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::Started => write!(f, "STARTED"),
            ResultType::Diagnostic => write!(f, "DIAGNOSTIC"),
            ResultType::Value => write!(f, "VALUE"),
            ResultType::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload<T> {
    Started,
    Diagnostic {
        level: DiagnosticLevel,
        message: String,
    },
    Value {
        value: T,
    },
    Error {
        error: TaskError,
    },
}

/// One event of a job's execution, tagged with the step that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult<T> {
    pub step: StepInfo,
    pub payload: Payload<T>,
    pub at: DateTime<Utc>,
}

impl<T> JobResult<T> {
    pub(crate) fn new(step: StepInfo, payload: Payload<T>) -> Self {
        Self {
            step,
            payload,
            at: Utc::now(),
        }
    }

    pub(crate) fn started(step: StepInfo) -> Self {
        Self::new(step, Payload::Started)
    }

    pub(crate) fn diagnostic(step: StepInfo, level: DiagnosticLevel, message: String) -> Self {
        Self::new(step, Payload::Diagnostic { level, message })
    }

    pub(crate) fn terminal(step: StepInfo, outcome: Result<T, TaskError>) -> Self {
        match outcome {
            Ok(value) => Self::new(step, Payload::Value { value }),
            Err(error) => Self::new(step, Payload::Error { error }),
        }
    }

    pub fn result_type(&self) -> ResultType {
        match self.payload {
            Payload::Started => ResultType::Started,
            Payload::Diagnostic { .. } => ResultType::Diagnostic,
            Payload::Value { .. } => ResultType::Value,
            Payload::Error { .. } => ResultType::Error,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.step.sequence
    }

    pub fn is_terminal(&self) -> bool {
        self.result_type().is_terminal()
    }

    pub fn value(&self) -> Option<&T> {
        match &self.payload {
            Payload::Value { value } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self.payload {
            Payload::Value { value } => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.payload {
            Payload::Error { error } => Some(error),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Diagnostic { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Display for JobResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ", self.step.sequence, self.result_type())?;
        match &self.payload {
            Payload::Started => write!(f, "{}", self.step.description),
            Payload::Diagnostic { level, message } => write!(f, "({level}) {message}"),
            Payload::Value { value } => write!(f, "{value:?}"),
            Payload::Error { error } => write!(f, "{error}"),
        }
    }
}

/// Filtering helpers over any stream of [`JobResult`]s.
pub trait ResultStreamExt<T>: Stream<Item = JobResult<T>> + Sized {
    /// Drops `VALUE` results, keeping progress markers and errors in order.
    fn progress_only(self) -> impl Stream<Item = JobResult<T>> {
        self.filter_types(&[ResultType::Started, ResultType::Diagnostic, ResultType::Error])
    }

    fn errors_only(self) -> impl Stream<Item = JobResult<T>> {
        self.filter_types(&[ResultType::Error])
    }

    fn filter_types(self, types: &[ResultType]) -> impl Stream<Item = JobResult<T>> {
        let wanted = types.to_vec();
        self.filter(move |result| ready(wanted.contains(&result.result_type())))
    }

    /// Unwraps successful step outputs, discarding everything else.
    fn values(self) -> impl Stream<Item = T> {
        self.filter_map(|result| ready(result.into_value()))
    }

    /// Drives the stream to completion and returns the final result observed.
    fn last_result(self) -> impl Future<Output = Option<JobResult<T>>> {
        self.fold(None, |_, result| ready(Some(result)))
    }

    /// Drives the stream to completion and returns the last `VALUE` payload.
    fn last_value(self) -> impl Future<Output = Option<T>> {
        self.values().fold(None, |_, value| ready(Some(value)))
    }
}

impl<T, S> ResultStreamExt<T> for S where S: Stream<Item = JobResult<T>> + Sized {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn info(sequence: u32) -> StepInfo {
        StepInfo::new(sequence, format!("step {sequence}"), "test")
    }

    fn sample() -> Vec<JobResult<&'static str>> {
        vec![
            JobResult::started(info(1)),
            JobResult::diagnostic(info(1), DiagnosticLevel::Info, "writing config".into()),
            JobResult::terminal(info(1), Ok("arn:config:1")),
            JobResult::started(info(2)),
            JobResult::terminal(info(2), Err(TaskError::business("quota exceeded"))),
            JobResult::started(info(3)),
            JobResult::terminal(info(3), Ok("broker1:9092")),
        ]
    }

    #[tokio::test]
    async fn progress_only_drops_values_and_keeps_order() {
        let filtered: Vec<_> = stream::iter(sample()).progress_only().collect().await;
        let kinds: Vec<_> = filtered.iter().map(|r| (r.sequence(), r.result_type())).collect();
        assert_eq!(
            kinds,
            vec![
                (1, ResultType::Started),
                (1, ResultType::Diagnostic),
                (2, ResultType::Started),
                (2, ResultType::Error),
                (3, ResultType::Started),
            ]
        );
    }

    #[tokio::test]
    async fn errors_only_and_values() {
        let errors: Vec<_> = stream::iter(sample()).errors_only().collect().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error().unwrap().message, "quota exceeded");

        let values: Vec<_> = stream::iter(sample()).values().collect().await;
        assert_eq!(values, vec!["arn:config:1", "broker1:9092"]);
    }

    #[tokio::test]
    async fn last_value_and_last_result() {
        assert_eq!(stream::iter(sample()).last_value().await, Some("broker1:9092"));

        let last = stream::iter(sample()).last_result().await.unwrap();
        assert_eq!(last.sequence(), 3);
        assert!(last.is_terminal());

        let empty: Vec<JobResult<&str>> = Vec::new();
        assert_eq!(stream::iter(empty).last_value().await, None);
    }

    #[test]
    fn display_formats() {
        let results = sample();
        assert_eq!(results[0].to_string(), "[1] STARTED step 1");
        assert_eq!(results[1].to_string(), "[1] DIAGNOSTIC (INFO) writing config");
        assert_eq!(results[2].to_string(), "[1] VALUE \"arn:config:1\"");
        assert_eq!(results[4].to_string(), "[2] ERROR Business failure: quota exceeded");
    }

    #[test]
    fn serializes_with_type_tag() {
        let result = JobResult::terminal(info(2), Ok::<_, TaskError>(7_u32));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["payload"]["type"], "VALUE");
        assert_eq!(json["payload"]["value"], 7);
        assert_eq!(json["step"]["sequence"], 2);
    }
}
