use crate::error::CallError;
use crate::performance::metrics::MetricsCollector;
use crate::performance::outcome::{classify, InvocationResult, Outcome, Reply};
use crate::performance::payload::{worker_rng, PayloadProvider};
use crate::performance::target::Connector;
use rand::rngs::StdRng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

/// Lifecycle state shared between a worker and the scheduler that owns it.
#[derive(Debug, Clone)]
pub struct Lifecycle(Arc<AtomicU8>);

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(WorkerState::Starting as u8)))
    }

    pub fn get(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Starting,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }

    pub fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `Running` unless the scheduler already asked for a stop.
    fn mark_running(&self) {
        let _ = self.0.compare_exchange(
            WorkerState::Starting as u8,
            WorkerState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Everything a worker needs, shared by all workers of a run.
pub struct WorkerContext {
    pub connector: Arc<dyn Connector>,
    pub payloads: PayloadProvider,
    pub collector: Arc<MetricsCollector>,
    pub pacing: Duration,
    pub call_timeout: Duration,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub iterations: u64,
}

pub struct Worker {
    id: u64,
    context: Arc<WorkerContext>,
    lifecycle: Lifecycle,
    stop: watch::Receiver<bool>,
    rng: StdRng,
}

impl Worker {
    pub fn new(
        id: u64,
        context: Arc<WorkerContext>,
        lifecycle: Lifecycle,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let rng = worker_rng(context.seed, id);
        Self {
            id,
            context,
            lifecycle,
            stop,
            rng,
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Iterate until the scheduler asks for a stop. A stop never interrupts a
    /// call in flight; it is honoured before the next iteration or during pacing.
    pub async fn run(mut self) -> WorkerStats {
        self.lifecycle.mark_running();
        let mut stats = WorkerStats::default();

        while !self.stop_requested() {
            let result = self.iterate(stats.iterations == 0).await;
            if let Outcome::Fail { kind, detail } = &result.outcome {
                debug!(worker = self.id, kind = kind.label(), %detail, "call failed");
            }
            self.context.collector.record(result);
            stats.iterations += 1;

            if self.context.pacing.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = sleep(self.context.pacing) => {}
                changed = self.stop.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.lifecycle.set(WorkerState::Stopped);
        trace!(worker = self.id, iterations = stats.iterations, "worker stopped");
        stats
    }

    /// One iteration: open a session, build a payload, call, classify.
    async fn iterate(&mut self, first: bool) -> InvocationResult {
        let started = Instant::now();
        let call_timeout = self.context.call_timeout;

        let (result, call_time) = match timeout(call_timeout, self.call()).await {
            Ok((result, call_time)) => (result, call_time),
            Err(_) => (Err(CallError::Timeout(call_timeout)), started.elapsed()),
        };

        if first {
            debug!(worker = self.id, result = ?result, "first call result");
        }

        InvocationResult::new(call_time, classify(&result))
    }

    /// Returns the result and the time spent in the call itself. When no
    /// session could be opened, the time spent trying to connect is returned.
    async fn call(&mut self) -> (Result<Reply, CallError>, Duration) {
        let connect_started = Instant::now();
        let mut session = match self.context.connector.connect().await {
            Ok(session) => session,
            Err(err) => return (Err(err), connect_started.elapsed()),
        };

        let payload = self.context.payloads.next_payload(&mut self.rng);
        let call_started = Instant::now();
        let result = session.invoke(&payload).await;
        let elapsed = call_started.elapsed();

        drop(session);
        (result, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performance::outcome::FailureKind;
    use crate::performance::payload::Payload;
    use crate::performance::target::Session;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        open: AtomicUsize,
        opened: AtomicUsize,
        seen: Mutex<Vec<Payload>>,
    }

    struct CountingSession {
        counters: Arc<Counters>,
        latency: Duration,
        reply: Result<Reply, CallError>,
    }

    impl Drop for CountingSession {
        fn drop(&mut self) {
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Session for CountingSession {
        async fn invoke(&mut self, payload: &Payload) -> Result<Reply, CallError> {
            self.counters.seen.lock().push(payload.clone());
            sleep(self.latency).await;
            self.reply.clone()
        }
    }

    struct CountingConnector {
        counters: Arc<Counters>,
        latency: Duration,
        reply: Result<Reply, CallError>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> Result<Box<dyn Session>, CallError> {
            self.counters.open.fetch_add(1, Ordering::SeqCst);
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession {
                counters: Arc::clone(&self.counters),
                latency: self.latency,
                reply: self.reply.clone(),
            }))
        }

        fn describe(&self) -> String {
            "counting".to_string()
        }
    }

    fn context(
        counters: &Arc<Counters>,
        latency: Duration,
        reply: Result<Reply, CallError>,
        call_timeout: Duration,
    ) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            connector: Arc::new(CountingConnector {
                counters: Arc::clone(counters),
                latency,
                reply,
            }),
            payloads: PayloadProvider::fixed("550e8400-e29b-41d4-a716-446655440000"),
            collector: Arc::new(MetricsCollector::new()),
            pacing: Duration::from_millis(100),
            call_timeout,
            seed: Some(1),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_records_and_paces_until_stopped() {
        let counters = Arc::new(Counters::default());
        let ctx = context(&counters, Duration::from_millis(50), Ok(Reply::ok()), Duration::from_secs(5));
        let (stop_tx, stop_rx) = watch::channel(false);
        let lifecycle = Lifecycle::new();

        let handle = tokio::spawn(Worker::new(0, Arc::clone(&ctx), lifecycle.clone(), stop_rx).run());

        // Each iteration is 50ms of call plus 100ms of pacing.
        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(lifecycle.get(), WorkerState::Running);
        stop_tx.send(true).unwrap();

        let stats = handle.await.unwrap();
        assert_eq!(lifecycle.get(), WorkerState::Stopped);
        assert!((6..=8).contains(&stats.iterations), "{} iterations", stats.iterations);
        assert_eq!(ctx.collector.snapshot().failed_count(), 0);

        let snapshot = ctx.collector.snapshot();
        assert_eq!(snapshot.ok_count(), stats.iterations);
        assert!(snapshot.ok_durations_ms().iter().all(|d| (*d - 50.0).abs() < 1.0));
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
        assert_eq!(counters.opened.load(Ordering::SeqCst) as u64, stats.iterations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_recorded_and_loop_continues() {
        let counters = Arc::new(Counters::default());
        let ctx = context(
            &counters,
            Duration::from_millis(10),
            Err(CallError::Status {
                code: "14".into(),
                message: "unavailable".into(),
            }),
            Duration::from_secs(5),
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Worker::new(0, Arc::clone(&ctx), Lifecycle::new(), stop_rx).run());

        sleep(Duration::from_millis(500)).await;
        stop_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert!(stats.iterations > 1);
        let snapshot = ctx.collector.snapshot();
        assert_eq!(snapshot.failed_count(), stats.iterations);
        assert_eq!(snapshot.ok_count(), 0);
        assert_eq!(
            snapshot.failures_by_kind().get(&FailureKind::Status),
            Some(&stats.iterations)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_and_releases_session() {
        let counters = Arc::new(Counters::default());
        let ctx = context(&counters, Duration::from_secs(10), Ok(Reply::ok()), Duration::from_millis(200));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Worker::new(0, Arc::clone(&ctx), Lifecycle::new(), stop_rx).run());

        sleep(Duration::from_millis(250)).await;
        stop_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.iterations, 1);
        let snapshot = ctx.collector.snapshot();
        assert_eq!(snapshot.failures_by_kind().get(&FailureKind::Timeout), Some(&1));
        assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_call_in_flight_finish() {
        let counters = Arc::new(Counters::default());
        let ctx = context(&counters, Duration::from_millis(300), Ok(Reply::ok()), Duration::from_secs(5));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Worker::new(0, Arc::clone(&ctx), Lifecycle::new(), stop_rx).run());

        sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        // The first call was mid-flight when the stop arrived; it still counts.
        assert_eq!(stats.iterations, 1);
        assert_eq!(ctx.collector.snapshot().ok_count(), 1);
    }

    #[tokio::test]
    async fn test_stopped_before_start_does_nothing() {
        let counters = Arc::new(Counters::default());
        let ctx = context(&counters, Duration::ZERO, Ok(Reply::ok()), Duration::from_secs(1));
        let (_stop_tx, stop_rx) = watch::channel(true);
        let lifecycle = Lifecycle::new();
        lifecycle.set(WorkerState::Stopping);

        let stats = Worker::new(0, ctx, lifecycle.clone(), stop_rx).run().await;
        assert_eq!(stats.iterations, 0);
        assert_eq!(lifecycle.get(), WorkerState::Stopped);
        assert!(counters.seen.lock().is_empty());
    }
}
