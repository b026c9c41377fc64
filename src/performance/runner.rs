use crate::config::RunPlan;
use crate::performance::metrics::{MetricsCollector, RunSummary};
use crate::performance::monitor::PerformanceMonitor;
use crate::performance::scheduler::{ScheduleReport, StageScheduler};
use crate::performance::target::Connector;
use crate::performance::thresholds::{evaluate_all, RunVerdict};
use crate::performance::worker::WorkerContext;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Process exit code when the run completed but a threshold failed.
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;
/// Process exit code for configuration or setup errors. No load was generated.
pub const EXIT_SETUP_ERROR: u8 = 104;

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub target: String,
    pub payload: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub verdict: RunVerdict,
    pub schedule: ScheduleReport,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }

    pub fn exit_code(&self) -> u8 {
        if self.passed() {
            0
        } else {
            EXIT_THRESHOLDS_FAILED
        }
    }

    pub fn save_report(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub struct LoadTestRunner {
    plan: RunPlan,
    connector: Arc<dyn Connector>,
    monitor: Option<PerformanceMonitor>,
}

impl LoadTestRunner {
    pub fn new(plan: RunPlan, connector: Arc<dyn Connector>) -> Self {
        Self {
            plan,
            connector,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: PerformanceMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Run the timeline to completion and judge the result. Call failures
    /// never abort a run; they end up in the metrics and the verdict.
    pub async fn run(self) -> RunReport {
        let Self {
            plan,
            connector,
            monitor,
        } = self;

        let collector = Arc::new(MetricsCollector::new());
        let target = connector.describe();
        let context = Arc::new(WorkerContext {
            connector,
            payloads: plan.payloads.clone(),
            collector: Arc::clone(&collector),
            pacing: plan.schedule.pacing,
            call_timeout: plan.target.call_timeout,
            seed: plan.schedule.seed,
        });

        let scheduler = StageScheduler::new(
            plan.timeline.clone(),
            plan.schedule.tick,
            plan.schedule.grace_period,
        );
        let monitor_task = monitor.map(|m| {
            m.spawn(
                scheduler.subscribe(),
                Arc::clone(&collector),
                plan.timeline.total_duration(),
            )
        });

        info!(name = %plan.name, %target, "run started");
        let started_at = Utc::now();
        let schedule = scheduler.run(context).await;
        let finished_at = Utc::now();

        if let Some(task) = monitor_task {
            let _ = task.await;
        }

        let snapshot = collector.snapshot();
        let summary = snapshot.summarize(schedule.realized_duration);
        let verdict = evaluate_all(&plan.thresholds, &snapshot);
        info!(
            calls = summary.total_calls,
            failed = summary.failed_calls,
            passed = verdict.passed,
            "run finished"
        );

        RunReport {
            name: plan.name,
            target,
            payload: plan.payloads.describe(),
            started_at,
            finished_at,
            summary,
            verdict,
            schedule,
        }
    }
}
