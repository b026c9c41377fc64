use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::{Overrides, RunPlan};
use crate::grpc::GrpcConnector;
use crate::performance::{LoadTestRunner, MonitorMode, PerformanceMonitor};
use crate::utils::{format_duration, parse_duration, parse_metadata};

pub struct RunOptions {
    pub config: PathBuf,
    pub endpoint: Option<String>,
    pub metadata: Vec<String>,
    pub seed: Option<u64>,
    pub tick: Option<String>,
    pub report_interval: String,
    pub output: Option<PathBuf>,
    pub ci: bool,
}

/// Returns the process exit code for a completed run.
pub async fn handle_run(options: RunOptions) -> Result<u8> {
    let overrides = Overrides {
        endpoint: options.endpoint,
        seed: options.seed,
        tick: options.tick,
        metadata: parse_metadata(&options.metadata)?,
    };
    let report_interval = parse_duration(&options.report_interval)?;

    let plan = RunPlan::load(&options.config, &overrides)
        .await
        .with_context(|| format!("Invalid run configuration: {}", options.config.display()))?;
    let connector =
        Arc::new(GrpcConnector::new(&plan.target).context("Failed to set up gRPC target")?);

    println!("{} Starting run {}", "→".cyan(), plan.name.bright_white());
    println!("Target: {}", plan.target.endpoint.bright_white());
    println!("Method: {}", plan.target.method.bright_white());
    println!("Payload: {}", plan.payloads.describe().bright_white());
    println!(
        "Stages: {} over {}, peak {} workers",
        plan.timeline.stages().len(),
        format_duration(plan.timeline.total_duration()),
        plan.timeline.peak()
    );
    if let Some(seed) = plan.schedule.seed {
        println!("Seed: {}", seed.to_string().bright_white());
    }

    let mode = if options.ci || !atty::is(atty::Stream::Stdout) {
        MonitorMode::Report(report_interval)
    } else {
        MonitorMode::Bar
    };

    let report = LoadTestRunner::new(plan, connector)
        .with_monitor(PerformanceMonitor::new(mode))
        .run()
        .await;

    PerformanceMonitor::print_final_summary(&report);

    if let Some(output_path) = options.output {
        println!();
        println!("Saving run report to: {}", output_path.display());
        match report.save_report(&output_path) {
            Ok(()) => println!("{} Run report saved", "✔".green()),
            // The verdict still decides the exit code.
            Err(e) => warn!(path = %output_path.display(), error = %e, "failed to save run report"),
        }
    }

    Ok(report.exit_code())
}
