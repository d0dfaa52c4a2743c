mod cli;
mod ui;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use grind::config::GrindConfig;
use grind::demo::{SimulatedCloud, provisioning_job};
use grind::{JobService, ReportBuilder, ResolutionContext, ResultOptions};
use ui::JobProgress;

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("grind=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("grind=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Applies command line overrides on top of the loaded configuration.
fn effective_options(cli: &Cli, config: &GrindConfig) -> ResultOptions {
    let mut options = config.result_options();
    if let Some(level) = cli.level {
        options.diagnostic_level = level;
    }
    if cli.keep_going {
        options.halt_on_error = false;
    }
    if let Some(ms) = cli.step_timeout_ms {
        options.step_timeout = Some(Duration::from_millis(ms));
    }
    options
}

async fn run_demo(
    options: ResultOptions,
    cluster: &str,
    fail_at: Option<u32>,
    latency_ms: u64,
) -> Result<ExitCode> {
    let cloud = SimulatedCloud::new(Duration::from_millis(latency_ms)).failing_at(fail_at);
    let service = JobService::new(ResolutionContext::builder().provide(cloud).build());
    let assembled = service.assemble(&provisioning_job(cluster), options)?;

    let progress = JobProgress::start(assembled.name(), assembled.steps().len());
    let mut report = ReportBuilder::new(assembled.name(), assembled.steps().len());
    let mut results = assembled.subscribe();

    let cancel = results.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling job");
            cancel.cancel();
        }
    });

    while let Some(result) = results.next().await {
        report.observe(&result);
        progress.observe(&result);
    }

    let report = report.finish();
    progress.complete(&report);

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = GrindConfig::load()?;
    let options = effective_options(&cli, &config);

    match &cli.command {
        Command::Demo {
            cluster,
            fail_at,
            latency_ms,
        } => run_demo(options, cluster, *fail_at, *latency_ms).await,
        Command::Config => {
            println!("diagnostic_level = {}", options.diagnostic_level);
            println!("halt_on_error    = {}", options.halt_on_error);
            match options.step_timeout {
                Some(timeout) => println!("step_timeout     = {}ms", timeout.as_millis()),
                None => println!("step_timeout     = none"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
