//! Terminal rendering for a running job: spinner plus coloured result lines.
//!
//! Uses `indicatif` for the spinner and `console` for styling. [`JobProgress`]
//! follows the result stream of one run and prints the [`JobReport`] at the end.

use std::fmt::Display;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use grind::{DiagnosticLevel, JobReport, JobResult, JobStatus, Payload};

pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl JobProgress {
    /// Starts the spinner for the named job.
    pub fn start(job: &str, steps: usize) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{job}: {steps} steps"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    /// Prints one result above the spinner.
    pub fn observe<T: Display>(&self, result: &JobResult<T>) {
        let step = &result.step;
        match &result.payload {
            Payload::Started => {
                self.pb.set_message(format!("#{} {}", step.sequence, step.description));
            }
            Payload::Diagnostic { level, message } => {
                let style = match level {
                    DiagnosticLevel::Trace => &self.dim,
                    _ => &self.yellow,
                };
                self.pb.println(format!(
                    "    {} {}",
                    style.apply_to(format!("[{level}]")),
                    style.apply_to(message)
                ));
            }
            Payload::Value { value } => {
                self.pb.println(format!(
                    "  {} #{} {}: {value}",
                    self.green.apply_to("✓"),
                    step.sequence,
                    step.description
                ));
            }
            Payload::Error { error } => {
                self.pb.println(format!(
                    "  {} #{} {}: {error}",
                    self.red.apply_to("✗"),
                    step.sequence,
                    step.description
                ));
            }
        }
    }

    /// Clears the spinner and prints the summary line followed by the report as JSON.
    pub fn complete(&self, report: &JobReport) {
        self.pb.finish_and_clear();
        let style = match report.status {
            JobStatus::Completed => &self.green,
            JobStatus::Failed => &self.red,
            JobStatus::Cancelled => &self.yellow,
        };
        println!(
            "  {} {} {}/{} steps",
            style.apply_to(report.status),
            report.job,
            report.steps_executed,
            report.steps_total
        );
        println!();
        println!("{}", style.apply_to("─── Job Report ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(report).unwrap_or_default()
        );
    }
}
