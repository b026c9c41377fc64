use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;

use crate::config::{Overrides, RunPlan};
use crate::grpc::GrpcConnector;
use crate::utils::format_duration;

/// Check a config file without generating any load.
pub async fn handle_validate(config: PathBuf) -> Result<()> {
    let plan = RunPlan::load(&config, &Overrides::default())
        .await
        .with_context(|| format!("Invalid run configuration: {}", config.display()))?;
    GrpcConnector::new(&plan.target).context("Failed to set up gRPC target")?;

    println!("{} {} is valid", "✔".green().bold(), config.display());
    println!("  Target: {} {}", plan.target.endpoint, plan.target.method);
    println!("  Payload: {}", plan.payloads.describe());
    for (index, stage) in plan.timeline.stages().iter().enumerate() {
        println!(
            "  Stage {}: {} → {} workers",
            index + 1,
            format_duration(stage.duration),
            stage.target
        );
    }
    if plan.thresholds.is_empty() {
        println!("  {}", "No thresholds defined".dimmed());
    }
    for threshold in &plan.thresholds {
        println!("  Threshold: {}", threshold);
    }

    Ok(())
}
