use crate::performance::outcome::{FailureKind, InvocationResult, Outcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_SHARDS: usize = 16;

/// Durations of recorded calls, partitioned by outcome. Append-only.
#[derive(Debug, Clone, Default)]
pub struct MetricSeries {
    pub ok_durations_ms: Vec<f64>,
    pub failed_durations_ms: BTreeMap<FailureKind, Vec<f64>>,
    pub first_completion: Option<Instant>,
    pub last_completion: Option<Instant>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: &InvocationResult) {
        let ms = result.duration_ms();
        match &result.outcome {
            Outcome::Ok => self.ok_durations_ms.push(ms),
            Outcome::Fail { kind, .. } => {
                self.failed_durations_ms.entry(*kind).or_default().push(ms)
            }
        }

        self.first_completion = Some(match self.first_completion {
            Some(first) => first.min(result.completed_at),
            None => result.completed_at,
        });
        self.last_completion = Some(match self.last_completion {
            Some(last) => last.max(result.completed_at),
            None => result.completed_at,
        });
    }

    pub fn merge(&mut self, other: &MetricSeries) {
        self.ok_durations_ms.extend(other.ok_durations_ms.iter());
        for (kind, durations) in &other.failed_durations_ms {
            self.failed_durations_ms
                .entry(*kind)
                .or_default()
                .extend(durations.iter());
        }

        self.first_completion = match (self.first_completion, other.first_completion) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_completion = match (self.last_completion, other.last_completion) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn ok_count(&self) -> u64 {
        self.ok_durations_ms.len() as u64
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_durations_ms.values().map(|v| v.len() as u64).sum()
    }

    pub fn total_count(&self) -> u64 {
        self.ok_count() + self.failed_count()
    }
}

/// Concurrent sink for call results.
///
/// Writes go to one of several independently locked shards, picked
/// round-robin, so hundreds of workers do not queue on a single lock.
pub struct MetricsCollector {
    shards: Box<[Mutex<MetricSeries>]>,
    next_shard: AtomicUsize,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(MetricSeries::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            next_shard: AtomicUsize::new(0),
        }
    }

    pub fn record(&self, result: InvocationResult) {
        let index = self.next_shard.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.shards[index].lock().push(&result);
    }

    /// Merge every shard into one view with sorted series.
    ///
    /// Consistent once writers have stopped; while a run is live it is a
    /// best-effort progress view.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut merged = MetricSeries::new();
        for shard in self.shards.iter() {
            merged.merge(&shard.lock());
        }
        MetricsSnapshot::from_series(merged)
    }

    pub fn total_count(&self) -> u64 {
        self.shards.iter().map(|s| s.lock().total_count()).sum()
    }
}

/// Read-only view of everything recorded, durations sorted ascending.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    series: MetricSeries,
}

impl MetricsSnapshot {
    pub fn from_series(mut series: MetricSeries) -> Self {
        series.ok_durations_ms.sort_by(f64::total_cmp);
        for durations in series.failed_durations_ms.values_mut() {
            durations.sort_by(f64::total_cmp);
        }
        Self { series }
    }

    /// Build a snapshot straight from results, mostly useful in tests.
    pub fn from_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = InvocationResult>,
    {
        let mut series = MetricSeries::new();
        for result in results {
            series.push(&result);
        }
        Self::from_series(series)
    }

    pub fn ok_durations_ms(&self) -> &[f64] {
        &self.series.ok_durations_ms
    }

    pub fn ok_count(&self) -> u64 {
        self.series.ok_count()
    }

    pub fn failed_count(&self) -> u64 {
        self.series.failed_count()
    }

    pub fn total_count(&self) -> u64 {
        self.series.total_count()
    }

    pub fn failures_by_kind(&self) -> BTreeMap<FailureKind, u64> {
        self.series
            .failed_durations_ms
            .iter()
            .map(|(kind, d)| (*kind, d.len() as u64))
            .collect()
    }

    /// Share of failed calls among all calls; `None` when nothing was recorded.
    pub fn failure_rate(&self) -> Option<f64> {
        let total = self.total_count();
        if total == 0 {
            None
        } else {
            Some(self.failed_count() as f64 / total as f64)
        }
    }

    /// Time between the first and the last completion.
    pub fn active_span(&self) -> Duration {
        match (self.series.first_completion, self.series.last_completion) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }

    pub fn summarize(&self, total_duration: Duration) -> RunSummary {
        let ok = self.ok_durations_ms();
        let stat = |f: fn(&[f64]) -> Option<f64>| f(ok).map(millis_to_duration);

        RunSummary {
            total_calls: self.total_count(),
            successful_calls: self.ok_count(),
            failed_calls: self.failed_count(),
            success_rate: self.failure_rate().map(|r| 1.0 - r).unwrap_or(0.0),
            calls_per_second: if total_duration.is_zero() {
                0.0
            } else {
                self.total_count() as f64 / total_duration.as_secs_f64()
            },
            average_duration: stat(mean),
            min_duration: stat(|s| s.first().copied()),
            max_duration: stat(|s| s.last().copied()),
            p50_duration: stat(|s| percentile_sorted(s, 50.0)),
            p90_duration: stat(|s| percentile_sorted(s, 90.0)),
            p95_duration: stat(|s| percentile_sorted(s, 95.0)),
            p99_duration: stat(|s| percentile_sorted(s, 99.0)),
            failures: self
                .failures_by_kind()
                .into_iter()
                .map(|(kind, count)| (kind.label().to_string(), count))
                .collect(),
            total_duration,
            active_duration: self.active_span(),
        }
    }
}

pub(crate) fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_nanos((ms.max(0.0) * 1_000_000.0).round() as u64)
}

pub(crate) fn duration_to_millis(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Linear-interpolated percentile over ascending samples.
///
/// rank = p/100 × (n−1); the result interpolates between the samples at
/// floor(rank) and ceil(rank). `None` for an empty series.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Percentile over samples in any order.
pub fn percentile(samples: &[f64], p: f64) -> Option<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

/// Aggregate figures for the final report. Durations are over successful calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    pub calls_per_second: f64,

    #[serde(with = "duration_ms_opt")]
    pub average_duration: Option<Duration>,
    #[serde(with = "duration_ms_opt")]
    pub min_duration: Option<Duration>,
    #[serde(with = "duration_ms_opt")]
    pub max_duration: Option<Duration>,
    #[serde(with = "duration_ms_opt")]
    pub p50_duration: Option<Duration>,
    #[serde(with = "duration_ms_opt")]
    pub p90_duration: Option<Duration>,
    #[serde(with = "duration_ms_opt")]
    pub p95_duration: Option<Duration>,
    #[serde(with = "duration_ms_opt")]
    pub p99_duration: Option<Duration>,

    pub failures: BTreeMap<String, u64>,

    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    /// First to last completion. Shorter than `total_duration` by ramp-up
    /// latency and by the drain.
    #[serde(with = "duration_ms")]
    pub active_duration: Duration,
}

// Durations are serialized as fractional milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(super::duration_to_millis(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = f64::deserialize(deserializer)?;
        Ok(super::millis_to_duration(millis))
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&super::duration_to_millis(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<f64>::deserialize(deserializer)?;
        Ok(millis.map(super::millis_to_duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ok(ms: u64) -> InvocationResult {
        InvocationResult::new(Duration::from_millis(ms), Outcome::Ok)
    }

    fn failed(ms: u64, kind: FailureKind) -> InvocationResult {
        InvocationResult::new(
            Duration::from_millis(ms),
            Outcome::Fail {
                kind,
                detail: "test".to_string(),
            },
        )
    }

    #[test]
    fn test_percentile_interpolates() {
        let samples = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&samples, 0.0), Some(10.0));
        assert_eq!(percentile(&samples, 50.0), Some(30.0));
        assert_eq!(percentile(&samples, 100.0), Some(50.0));
        // rank = 0.9 * 4 = 3.6 -> 40 + 0.6 * 10
        let p90 = percentile(&samples, 90.0).unwrap();
        assert!((p90 - 46.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_single_and_empty() {
        assert_eq!(percentile(&[], 95.0), None);
        assert_eq!(percentile(&[7.5], 95.0), Some(7.5));
    }

    #[test]
    fn test_percentile_is_order_independent() {
        let ascending: Vec<f64> = (1..=200).map(|n| (n * 7 % 113) as f64).collect();
        let mut shuffled = ascending.clone();
        shuffled.reverse();
        shuffled.swap(3, 150);
        shuffled.swap(10, 42);

        for p in [50.0, 90.0, 95.0, 99.0] {
            assert_eq!(percentile(&ascending, p), percentile(&shuffled, p));
            // Idempotent.
            assert_eq!(percentile(&ascending, p), percentile(&ascending, p));
        }
    }

    #[test]
    fn test_collector_partitions_by_outcome() {
        let collector = MetricsCollector::with_shards(4);
        collector.record(ok(100));
        collector.record(ok(150));
        collector.record(failed(200, FailureKind::Status));
        collector.record(failed(5, FailureKind::Connection));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_count(), 4);
        assert_eq!(snapshot.ok_count(), 2);
        assert_eq!(snapshot.failed_count(), 2);
        assert_eq!(snapshot.ok_durations_ms(), &[100.0, 150.0]);
        assert_eq!(snapshot.failure_rate(), Some(0.5));

        let by_kind = snapshot.failures_by_kind();
        assert_eq!(by_kind.get(&FailureKind::Status), Some(&1));
        assert_eq!(by_kind.get(&FailureKind::Connection), Some(&1));
    }

    #[test]
    fn test_collector_loses_nothing_under_concurrent_writes() {
        let collector = Arc::new(MetricsCollector::new());
        let threads: Vec<_> = (0..32)
            .map(|t| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        if (t + i) % 5 == 0 {
                            collector.record(failed(i, FailureKind::Timeout));
                        } else {
                            collector.record(ok(i));
                        }
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_count(), 32 * 500);
        assert_eq!(collector.total_count(), 32 * 500);
        assert_eq!(snapshot.ok_count() + snapshot.failed_count(), 32 * 500);
        assert!(snapshot
            .ok_durations_ms()
            .windows(2)
            .all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_summary_of_empty_snapshot() {
        let summary = MetricsSnapshot::default().summarize(Duration::from_secs(1));
        assert_eq!(summary.total_calls, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert!(summary.p95_duration.is_none());
        assert!(summary.average_duration.is_none());
        assert_eq!(summary.active_duration, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_duration_spans_first_to_last_completion() {
        let collector = MetricsCollector::new();
        collector.record(ok(20));
        tokio::time::advance(Duration::from_millis(400)).await;
        collector.record(failed(30, FailureKind::Status));
        tokio::time::advance(Duration::from_millis(350)).await;
        collector.record(ok(40));

        let summary = collector.snapshot().summarize(Duration::from_secs(2));
        assert_eq!(summary.active_duration, Duration::from_millis(750));
        assert_eq!(summary.total_duration, Duration::from_secs(2));
    }

    #[test]
    fn test_summary_uses_successful_calls_only() {
        let snapshot = MetricsSnapshot::from_results(vec![
            ok(100),
            ok(200),
            ok(300),
            failed(10_000, FailureKind::Timeout),
        ]);
        let summary = snapshot.summarize(Duration::from_secs(2));

        assert_eq!(summary.total_calls, 4);
        assert_eq!(summary.successful_calls, 3);
        assert_eq!(summary.success_rate, 0.75);
        assert_eq!(summary.calls_per_second, 2.0);
        assert_eq!(summary.max_duration, Some(Duration::from_millis(300)));
        assert_eq!(summary.min_duration, Some(Duration::from_millis(100)));
        assert_eq!(summary.p50_duration, Some(Duration::from_millis(200)));
        assert_eq!(summary.failures.get("timeout"), Some(&1));
    }

    #[test]
    fn test_summary_serializes_millis() {
        let snapshot = MetricsSnapshot::from_results(vec![ok(100), ok(150)]);
        let summary = snapshot.summarize(Duration::from_secs(1));
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["total_calls"], 2);
        assert!((json["average_duration"].as_f64().unwrap() - 125.0).abs() < 1e-6);
        assert_eq!(json["total_duration"].as_f64().unwrap(), 1000.0);
    }
}
