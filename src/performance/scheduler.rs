use crate::performance::stages::RampTimeline;
use crate::performance::worker::{Lifecycle, Worker, WorkerContext, WorkerState, WorkerStats};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Live view of the schedule, published on every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScheduleStatus {
    pub elapsed: Duration,
    pub stage: Option<usize>,
    pub target: u32,
    pub live: u32,
    pub finished: bool,
}

/// One tick of the control loop, after the population was adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickSample {
    #[serde(with = "crate::performance::metrics::duration_ms")]
    pub elapsed: Duration,
    pub stage: Option<usize>,
    pub level: f64,
    pub target: u32,
    pub live: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleReport {
    #[serde(with = "crate::performance::metrics::duration_ms")]
    pub planned_duration: Duration,
    /// Time from start until the final stage ended and all workers were told to stop.
    #[serde(with = "crate::performance::metrics::duration_ms")]
    pub realized_duration: Duration,
    #[serde(with = "crate::performance::metrics::duration_ms")]
    pub drain_duration: Duration,
    pub workers_spawned: u64,
    pub workers_aborted: u64,
    pub iterations: u64,
    pub samples: Vec<TickSample>,
}

struct WorkerHandle {
    id: u64,
    lifecycle: Lifecycle,
    stop: watch::Sender<bool>,
    task: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    fn request_stop(&self) {
        self.lifecycle.set(WorkerState::Stopping);
        let _ = self.stop.send(true);
    }
}

/// Drives the worker population along a [`RampTimeline`].
pub struct StageScheduler {
    timeline: RampTimeline,
    tick: Duration,
    grace_period: Duration,
    status: watch::Sender<ScheduleStatus>,
}

impl StageScheduler {
    pub fn new(timeline: RampTimeline, tick: Duration, grace_period: Duration) -> Self {
        let (status, _) = watch::channel(ScheduleStatus::default());
        Self {
            timeline,
            tick: tick.max(Duration::from_millis(1)),
            grace_period,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ScheduleStatus> {
        self.status.subscribe()
    }

    /// Run the whole timeline, then drain. Always returns, even when workers
    /// hang: stragglers are aborted once the grace period is over.
    pub async fn run(&self, context: Arc<WorkerContext>) -> ScheduleReport {
        let total = self.timeline.total_duration();
        let start = Instant::now();
        let end = start + total;

        let mut pool = Pool::new(context);
        let mut samples = Vec::new();
        let mut next_tick = start;

        info!(
            stages = self.timeline.stages().len(),
            duration = ?total,
            peak = self.timeline.peak(),
            "starting schedule"
        );

        loop {
            let elapsed = start.elapsed();
            if elapsed >= total {
                break;
            }

            pool.reap().await;

            let position = self.timeline.position(elapsed);
            let level = self.timeline.level_at(elapsed);
            let target = self.timeline.target_at(elapsed);
            pool.resize(target);

            let live = pool.live_count();
            samples.push(TickSample {
                elapsed,
                stage: position.map(|p| p.index),
                level,
                target,
                live,
            });
            let _ = self.status.send(ScheduleStatus {
                elapsed,
                stage: position.map(|p| p.index),
                target,
                live,
                finished: false,
            });

            next_tick += self.tick;
            sleep_until(next_tick.min(end)).await;
        }

        let realized_duration = start.elapsed();
        debug!(elapsed = ?realized_duration, "final stage over, draining workers");

        let drain_started = Instant::now();
        pool.resize(0);
        let aborted = pool.drain(self.grace_period).await;
        let drain_duration = drain_started.elapsed();

        let _ = self.status.send(ScheduleStatus {
            elapsed: start.elapsed(),
            stage: None,
            target: 0,
            live: 0,
            finished: true,
        });

        info!(
            realized = ?realized_duration,
            drain = ?drain_duration,
            spawned = pool.spawned,
            aborted,
            "schedule complete"
        );

        ScheduleReport {
            planned_duration: total,
            realized_duration,
            drain_duration,
            workers_spawned: pool.spawned,
            workers_aborted: aborted,
            iterations: pool.iterations,
            samples,
        }
    }
}

/// The workers of one run. Only the scheduler touches it.
struct Pool {
    context: Arc<WorkerContext>,
    live: Vec<WorkerHandle>,
    stopping: Vec<WorkerHandle>,
    next_id: u64,
    spawned: u64,
    iterations: u64,
}

impl Pool {
    fn new(context: Arc<WorkerContext>) -> Self {
        Self {
            context,
            live: Vec::new(),
            stopping: Vec::new(),
            next_id: 0,
            spawned: 0,
            iterations: 0,
        }
    }

    fn live_count(&self) -> u32 {
        self.live.len() as u32
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        self.spawned += 1;

        let lifecycle = Lifecycle::new();
        let (stop, stop_rx) = watch::channel(false);
        let worker = Worker::new(id, Arc::clone(&self.context), lifecycle.clone(), stop_rx);
        let task = tokio::spawn(worker.run());

        self.live.push(WorkerHandle {
            id,
            lifecycle,
            stop,
            task,
        });
    }

    /// Grow or shrink the live population to `target`. Newest workers are
    /// stopped first; they finish their current iteration before exiting.
    fn resize(&mut self, target: u32) {
        let live = self.live_count();
        if target > live {
            for _ in 0..(target - live) {
                self.spawn();
            }
            debug!(from = live, to = target, "spawned workers");
        } else if target < live {
            for _ in 0..(live - target) {
                if let Some(handle) = self.live.pop() {
                    handle.request_stop();
                    self.stopping.push(handle);
                }
            }
            debug!(from = live, to = target, "stopping workers");
        }
    }

    fn absorb(&mut self, id: u64, result: Result<WorkerStats, tokio::task::JoinError>) {
        match result {
            Ok(stats) => self.iterations += stats.iterations,
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(worker = id, error = %err, "worker task failed"),
        }
    }

    /// Collect workers that have exited. Live workers that died on their own
    /// leave the live set, so the next tick replaces them.
    async fn reap(&mut self) {
        let mut done = Vec::new();

        let (finished, live): (Vec<_>, Vec<_>) =
            self.live.drain(..).partition(|h| h.task.is_finished());
        self.live = live;
        done.extend(finished);

        let (finished, stopping): (Vec<_>, Vec<_>) =
            self.stopping.drain(..).partition(|h| h.task.is_finished());
        self.stopping = stopping;
        done.extend(finished);

        for handle in done {
            handle.lifecycle.set(WorkerState::Stopped);
            let result = handle.task.await;
            self.absorb(handle.id, result);
        }
    }

    /// Wait for every stopping worker, aborting whatever is left after `grace`.
    /// Returns the number of aborted workers.
    async fn drain(&mut self, grace: Duration) -> u64 {
        let deadline = Instant::now() + grace;
        let mut pending = FuturesUnordered::new();
        let mut aborts: HashMap<u64, (AbortHandle, Lifecycle)> = HashMap::new();

        for handle in self.stopping.drain(..).chain(self.live.drain(..)) {
            handle.request_stop();
            aborts.insert(handle.id, (handle.task.abort_handle(), handle.lifecycle.clone()));
            let id = handle.id;
            // Keep the sender alive until the task is done.
            let stop = handle.stop;
            let task = handle.task;
            pending.push(async move {
                let result = task.await;
                drop(stop);
                (id, result)
            });
        }

        let timeout_future = sleep_until(deadline);
        tokio::pin!(timeout_future);

        let mut aborted = 0;
        loop {
            tokio::select! {
                next = pending.next() => {
                    match next {
                        Some((id, result)) => {
                            if let Some((_, lifecycle)) = aborts.remove(&id) {
                                lifecycle.set(WorkerState::Stopped);
                            }
                            self.absorb(id, result);
                        }
                        None => break,
                    }
                }
                _ = &mut timeout_future => {
                    for (id, (abort, lifecycle)) in aborts.drain() {
                        warn!(worker = id, "worker still busy after grace period, aborting");
                        abort.abort();
                        lifecycle.set(WorkerState::Stopped);
                        aborted += 1;
                    }
                    while let Some((id, result)) = pending.next().await {
                        self.absorb(id, result);
                    }
                    break;
                }
            }
        }

        aborted
    }
}
