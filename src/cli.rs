//! Command line interface built on clap.
//!
//! [`Cli`] carries the [`Command`] subcommands (demo, config) and the global
//! flags that override `grind.toml` (--level, --keep-going, --verbose).

use clap::{Parser, Subcommand};

use grind::DiagnosticLevel;

/// Grind: sequential job execution with streamed step results.
#[derive(Debug, Parser)]
#[command(name = "grind", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Diagnostic level for assembled jobs, overriding grind.toml.
    #[arg(long, global = true)]
    pub level: Option<DiagnosticLevel>,

    /// Keep running later steps after a step fails.
    #[arg(long, global = true, default_value_t = false)]
    pub keep_going: bool,

    /// Per-step timeout in milliseconds, overriding grind.toml.
    #[arg(long, global = true)]
    pub step_timeout_ms: Option<u64>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision a simulated Kafka cluster and stream each step's results.
    Demo {
        /// Cluster name used in the generated resource identifiers.
        #[arg(long, default_value = "kafka-demo")]
        cluster: String,

        /// Make the cloud call issued by this step fail.
        #[arg(long)]
        fail_at: Option<u32>,

        /// Simulated latency of each cloud call in milliseconds.
        #[arg(long, default_value_t = 300)]
        latency_ms: u64,
    },

    /// Print the effective result options.
    Config,
}
