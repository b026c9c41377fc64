use crate::performance::metrics::MetricsCollector;
use crate::performance::outcome::FailureKind;
use crate::performance::runner::RunReport;
use crate::performance::scheduler::ScheduleStatus;
use crate::ui::progress::create_run_progress_bar;
use crate::utils::format_duration;
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How live progress is shown while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// Redrawn progress bar, for interactive terminals.
    Bar,
    /// A plain report every interval, for CI logs.
    Report(Duration),
}

pub struct PerformanceMonitor {
    mode: MonitorMode,
}

impl PerformanceMonitor {
    pub fn new(mode: MonitorMode) -> Self {
        Self { mode }
    }

    /// Follow the schedule until it reports `finished`.
    pub fn spawn(
        self,
        status: watch::Receiver<ScheduleStatus>,
        collector: Arc<MetricsCollector>,
        planned: Duration,
    ) -> JoinHandle<()> {
        match self.mode {
            MonitorMode::Bar => tokio::spawn(follow_with_bar(status, collector, planned)),
            MonitorMode::Report(interval) => {
                tokio::spawn(follow_with_reports(status, collector, planned, interval))
            }
        }
    }

    /// Print the final summary and the threshold verdicts.
    pub fn print_final_summary(report: &RunReport) {
        let summary = &report.summary;

        println!();
        println!("{}", "=".repeat(60).dimmed());
        println!("{} {}", "Run summary:".bright_white(), report.name.bold());
        println!("{}", "=".repeat(60).dimmed());

        println!();
        println!("  Target: {}", report.target.bright_white());
        println!("  Payload: {}", report.payload.bright_white());
        println!(
            "  Duration: {} planned, {} realized, {} drain",
            format_duration(report.schedule.planned_duration),
            format_duration(report.schedule.realized_duration),
            format_duration(report.schedule.drain_duration)
        );
        println!(
            "  Workers: {} spawned, {} aborted",
            report.schedule.workers_spawned,
            report.schedule.workers_aborted
        );

        println!();
        println!("{}", "Calls:".bright_white());
        println!("  Total: {}", summary.total_calls.to_string().bright_white());
        println!("  Successful: {}", summary.successful_calls.to_string().green());
        println!("  Failed: {}", summary.failed_calls.to_string().red());
        println!("  Success rate: {:.2}%", summary.success_rate * 100.0);
        println!("  Calls/sec: {:.1}", summary.calls_per_second);
        println!("  Active: {}", format_duration(summary.active_duration));

        if summary.failed_calls > 0 {
            for kind in FailureKind::ALL {
                if let Some(count) = summary.failures.get(kind.label()) {
                    println!("    {}: {}", kind.label(), count.to_string().red());
                }
            }
        }

        println!();
        println!("{}", "Latency of successful calls:".bright_white());
        let rows = [
            ("avg", summary.average_duration),
            ("min", summary.min_duration),
            ("med", summary.p50_duration),
            ("p(90)", summary.p90_duration),
            ("p(95)", summary.p95_duration),
            ("p(99)", summary.p99_duration),
            ("max", summary.max_duration),
        ];
        for (label, value) in rows {
            match value {
                Some(d) => println!("  {:<6} {:.2}ms", label, d.as_secs_f64() * 1000.0),
                None => println!("  {:<6} {}", label, "n/a".dimmed()),
            }
        }

        println!();
        if report.verdict.verdicts.is_empty() {
            println!("{}", "No thresholds defined".dimmed());
        } else {
            println!("{}", "Thresholds:".bright_white());
            for verdict in &report.verdict.verdicts {
                let observed = verdict
                    .observed
                    .map(|v| format!("{:.2}", v))
                    .unwrap_or_else(|| "no data".to_string());
                if verdict.passed {
                    println!("  {} {} (observed {})", "✔".green(), verdict.threshold, observed);
                } else {
                    println!("  {} {} (observed {})", "✗".red(), verdict.threshold, observed);
                }
            }
        }

        println!();
        if report.passed() {
            println!("{} All thresholds passed", "✔".green().bold());
        } else {
            println!(
                "{} {} threshold(s) failed",
                "✗".red().bold(),
                report.verdict.failed().count()
            );
        }
        println!("{}", "=".repeat(60).dimmed());
    }
}

fn status_line(status: &ScheduleStatus, calls: u64) -> String {
    let stage = match status.stage {
        Some(index) => format!("stage {}", index + 1),
        None => "draining".to_string(),
    };
    format!(
        "{} • target {} • live {} • {} calls",
        stage, status.target, status.live, calls
    )
}

async fn follow_with_bar(
    mut status: watch::Receiver<ScheduleStatus>,
    collector: Arc<MetricsCollector>,
    planned: Duration,
) {
    let pb = create_run_progress_bar(planned);

    while status.changed().await.is_ok() {
        let current = *status.borrow_and_update();
        pb.set_position(current.elapsed.min(planned).as_millis() as u64);
        pb.set_message(status_line(&current, collector.total_count()));
        if current.finished {
            break;
        }
    }

    pb.finish_and_clear();
}

async fn follow_with_reports(
    mut status: watch::Receiver<ScheduleStatus>,
    collector: Arc<MetricsCollector>,
    planned: Duration,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = *status.borrow();
                print_progress_report(&current, &collector, planned);
            }
            changed = status.changed() => {
                if changed.is_err() || status.borrow().finished {
                    break;
                }
            }
        }
    }
}

fn print_progress_report(status: &ScheduleStatus, collector: &MetricsCollector, planned: Duration) {
    let snapshot = collector.snapshot();
    let progress = if planned.is_zero() {
        100.0
    } else {
        (status.elapsed.as_secs_f64() / planned.as_secs_f64() * 100.0).min(100.0)
    };

    println!(
        "[{:>5.1}%] {} / {} • {}",
        progress,
        format_duration(status.elapsed),
        format_duration(planned),
        status_line(status, snapshot.total_count())
    );

    if let Some(rate) = snapshot.failure_rate() {
        let p95 = crate::performance::metrics::percentile_sorted(snapshot.ok_durations_ms(), 95.0);
        match p95 {
            Some(p95) => println!("          failed {:.2}% • p(95) {:.2}ms", rate * 100.0, p95),
            None => println!("          failed {:.2}%", rate * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let status = ScheduleStatus {
            elapsed: Duration::from_secs(45),
            stage: Some(1),
            target: 60,
            live: 59,
            finished: false,
        };
        assert_eq!(
            status_line(&status, 1200),
            "stage 2 • target 60 • live 59 • 1200 calls"
        );

        let draining = ScheduleStatus {
            stage: None,
            ..status
        };
        assert!(status_line(&draining, 0).starts_with("draining"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_monitor_stops_when_finished() {
        let (tx, rx) = watch::channel(ScheduleStatus::default());
        let monitor = PerformanceMonitor::new(MonitorMode::Report(Duration::from_secs(1)));
        let task = monitor.spawn(rx, Arc::new(MetricsCollector::new()), Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        tx.send(ScheduleStatus {
            finished: true,
            ..Default::default()
        })
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
