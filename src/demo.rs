//! Simulated "provision Kafka cluster" job.
//!
//! Mirrors the shape of a real provisioning service: create a configuration,
//! create the cluster, wait for it to turn active, then fetch the broker
//! endpoints. Every task talks to a [`SimulatedCloud`] resolved from the
//! context, so the job runs without any vendor SDK.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::TaskError;
use crate::job::JobDefinition;
use crate::task::{self, RetryPolicy, TaskContext};

/// Stand-in for a cloud vendor API client.
#[derive(Debug)]
pub struct SimulatedCloud {
    latency: Duration,
    fail_at: Option<u32>,
    polls_until_active: u32,
    polls: AtomicU32,
}

impl Default for SimulatedCloud {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}

impl SimulatedCloud {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_at: None,
            polls_until_active: 2,
            polls: AtomicU32::new(0),
        }
    }

    /// Makes the call issued by step `sequence` fail with a quota error.
    pub fn failing_at(mut self, sequence: Option<u32>) -> Self {
        self.fail_at = sequence;
        self
    }

    pub fn polls_until_active(mut self, polls: u32) -> Self {
        self.polls_until_active = polls;
        self
    }

    async fn call(&self, ctx: &TaskContext, operation: &str) -> Result<(), TaskError> {
        ctx.trace(format!("calling {operation}"));
        tokio::time::sleep(self.latency).await;
        if self.fail_at == Some(ctx.step().sequence) {
            return Err(TaskError::business(format!("{operation}: quota exceeded")));
        }
        Ok(())
    }

    async fn describe_cluster(&self, ctx: &TaskContext) -> Result<&'static str, TaskError> {
        self.call(ctx, "DescribeCluster").await?;
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll < self.polls_until_active {
            Ok("CREATING")
        } else {
            Ok("ACTIVE")
        }
    }
}

/// Builds the provisioning job. Step numbering:
/// 1 create configuration, 2 create cluster, 3 wait for active, 4 fetch brokers.
pub fn provisioning_job(cluster: &str) -> JobDefinition<Value> {
    let name = cluster.to_string();
    let create_config = task::from_fn(move |ctx: TaskContext| {
        let name = name.clone();
        async move {
            let cloud = ctx.resolve::<SimulatedCloud>()?;
            cloud.call(&ctx, "CreateConfiguration").await?;
            ctx.info(format!("configuration for {name} created"));
            Ok::<_, TaskError>(json!({ "configuration_arn": format!("arn:config:{name}:1") }))
        }
    })
    .describe("create configuration");

    let name = cluster.to_string();
    let create_cluster = task::from_fn(move |ctx: TaskContext| {
        let name = name.clone();
        async move {
            let cloud = ctx.resolve::<SimulatedCloud>()?;
            cloud.call(&ctx, "CreateCluster").await?;
            Ok::<_, TaskError>(json!({ "cluster_arn": format!("arn:cluster:{name}"), "state": "CREATING" }))
        }
    })
    .describe("create cluster");

    let poll_active = task::from_fn(|ctx: TaskContext| async move {
        let cloud = ctx.resolve::<SimulatedCloud>()?;
        match cloud.describe_cluster(&ctx).await? {
            "ACTIVE" => Ok(json!({ "state": "ACTIVE" })),
            state => Err(TaskError::system(format!("cluster is {state}"))),
        }
    })
    .describe("wait for cluster to become active");
    let wait_active = task::retry(
        poll_active,
        RetryPolicy {
            max_retries: 5,
            base_delay_ms: 200,
        },
    );

    let fetch_brokers = task::from_fn(|ctx: TaskContext| async move {
        let cloud = ctx.resolve::<SimulatedCloud>()?;
        cloud.call(&ctx, "GetBootstrapBrokers").await?;
        Ok::<_, TaskError>(json!({ "brokers": ["broker1:9092", "broker2:9092", "broker3:9092"] }))
    })
    .describe("fetch broker endpoints");

    JobDefinition::new(format!("provision {cluster}"))
        .task(create_config)
        .job(
            JobDefinition::new("cluster")
                .task(create_cluster)
                .task(wait_active),
        )
        .task(fetch_brokers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolutionContext;
    use crate::options::{DiagnosticLevel, ResultOptions};
    use crate::report::JobStatus;
    use crate::result::{ResultStreamExt, ResultType};
    use crate::service::JobService;
    use futures::StreamExt;

    fn service(cloud: SimulatedCloud) -> JobService {
        JobService::new(ResolutionContext::builder().provide(cloud).build())
    }

    #[tokio::test(start_paused = true)]
    async fn provisions_cluster_end_to_end() {
        let svc = service(SimulatedCloud::default());
        let assembled = svc.assemble_default(&provisioning_job("kafka-demo")).unwrap();
        assert_eq!(assembled.steps().len(), 4);

        let brokers = assembled.last_value().await.unwrap().unwrap();
        assert_eq!(brokers["brokers"][0], "broker1:9092");
    }

    #[tokio::test(start_paused = true)]
    async fn quota_failure_halts_provisioning() {
        let svc = service(SimulatedCloud::default().failing_at(Some(2)));
        let assembled = svc.assemble_default(&provisioning_job("kafka-demo")).unwrap();

        let report = assembled.run_to_report().await;
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.steps_executed, 2);
        assert_eq!(report.errors[0].sequence, 2);
        assert_eq!(report.errors[0].error.message, "CreateCluster: quota exceeded");
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_active_reports_retries_at_trace() {
        let svc = service(SimulatedCloud::default().polls_until_active(3));
        let options = ResultOptions::default().with_diagnostic_level(DiagnosticLevel::Trace);
        let assembled = svc.assemble(&provisioning_job("kafka-demo"), options).unwrap();

        let progress: Vec<_> = assembled.subscribe().progress_only().collect().await;
        assert!(progress.iter().all(|r| r.result_type() != ResultType::Value));
        let retries = progress
            .iter()
            .filter(|r| r.sequence() == 3)
            .filter_map(|r| r.message())
            .filter(|m| m.starts_with("retry"))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn missing_cloud_is_a_system_error() {
        let assembled = JobService::default()
            .assemble_default(&provisioning_job("kafka-demo"))
            .unwrap();
        let errors: Vec<_> = assembled.subscribe().errors_only().collect().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].sequence(), 1);
    }
}
