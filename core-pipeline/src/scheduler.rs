//! Bounded-concurrency batch scheduler
//!
//! Runs one pipeline invocation per item with at most `limit` invocations in
//! flight. Every invocation gets its own task, so a failure or panic only
//! loses that item and never cancels its siblings. [`BatchScheduler::run`]
//! returns after every task has terminated.
//!
//! Two modes are available:
//!
//! - [`SchedulerMode::WorkerPool`]: `limit` workers pull from a shared queue;
//!   a worker that finishes starts the next item immediately.
//! - [`SchedulerMode::Barrier`]: items run in chunks of `limit` and chunk
//!   `n + 1` starts only after every task of chunk `n` terminated.

use core_runtime::config::SchedulerMode;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, error, info};

/// Outcome counts of one scheduler run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub panicked: usize,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.total += other.total;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.panicked += other.panicked;
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.panicked == 0
    }

    fn record<O, E: fmt::Display>(&mut self, outcome: std::result::Result<Result<O, E>, JoinError>) {
        match outcome {
            Ok(Ok(_)) => self.succeeded += 1,
            Ok(Err(e)) => {
                debug!(error = %e, "Item pipeline failed");
                self.failed += 1;
            }
            Err(e) if e.is_panic() => {
                error!(error = %e, "Item pipeline panicked");
                self.panicked += 1;
            }
            Err(e) => {
                error!(error = %e, "Item pipeline was cancelled");
                self.failed += 1;
            }
        }
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items: {} succeeded, {} failed, {} panicked",
            self.total, self.succeeded, self.failed, self.panicked
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    limit: usize,
    mode: SchedulerMode,
}

impl BatchScheduler {
    /// A `limit` of zero is treated as one.
    pub fn new(limit: usize, mode: SchedulerMode) -> Self {
        Self {
            limit: limit.max(1),
            mode,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// Run `pipeline` once per item and wait for all of them.
    pub async fn run<T, F, Fut, O, E>(&self, items: Vec<T>, pipeline: F) -> BatchReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return BatchReport::default();
        }

        let pipeline = Arc::new(pipeline);
        let mut report = match self.mode {
            SchedulerMode::WorkerPool => self.run_pool(items, pipeline).await,
            SchedulerMode::Barrier => self.run_barrier(items, pipeline).await,
        };
        report.total = total;

        info!(mode = %self.mode, limit = self.limit, %report, "Batch finished");
        report
    }

    async fn run_pool<T, F, Fut, O, E>(&self, items: Vec<T>, pipeline: Arc<F>) -> BatchReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let workers = self.limit.min(items.len());
        let (work_tx, work_rx) = async_channel::bounded::<T>(items.len().max(1));

        for item in items {
            work_tx.send(item).await.ok();
        }
        work_tx.close();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let work_rx = work_rx.clone();
            let pipeline = pipeline.clone();

            handles.push(tokio::spawn(async move {
                let mut report = BatchReport::default();
                while let Ok(item) = work_rx.recv().await {
                    let outcome = tokio::spawn((*pipeline)(item)).await;
                    report.record(outcome);
                }
                debug!(worker, "Worker drained the queue");
                report
            }));
        }

        let mut report = BatchReport::default();
        for handle in handles {
            match handle.await {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => error!(error = %e, "Scheduler worker terminated abnormally"),
            }
        }
        report
    }

    async fn run_barrier<T, F, Fut, O, E>(&self, items: Vec<T>, pipeline: Arc<F>) -> BatchReport
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        O: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let mut report = BatchReport::default();
        let mut items = items.into_iter();
        let mut batch = 0usize;

        loop {
            let handles: Vec<_> = items
                .by_ref()
                .take(self.limit)
                .map(|item| tokio::spawn((*pipeline)(item)))
                .collect();
            if handles.is_empty() {
                break;
            }

            debug!(batch, size = handles.len(), "Waiting for batch to drain");
            for outcome in join_all(handles).await {
                report.record(outcome);
            }
            batch += 1;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Start(usize),
        End(usize),
    }

    /// Runs items `0..durations.len()`, each sleeping for its duration in ms
    async fn run_logged(scheduler: BatchScheduler, durations: Vec<u64>) -> Vec<Mark> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let items: Vec<(usize, u64)> = durations.into_iter().enumerate().collect();

        let pipeline_log = log.clone();
        let report = scheduler
            .run(items, move |(index, millis)| {
                let log = pipeline_log.clone();
                async move {
                    log.lock().unwrap().push(Mark::Start(index));
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    log.lock().unwrap().push(Mark::End(index));
                    Ok::<_, String>(())
                }
            })
            .await;
        assert!(report.is_clean());

        let marks = log.lock().unwrap().clone();
        marks
    }

    fn position(marks: &[Mark], mark: Mark) -> usize {
        marks.iter().position(|m| *m == mark).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_limit() {
        for mode in [SchedulerMode::WorkerPool, SchedulerMode::Barrier] {
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let scheduler = BatchScheduler::new(3, mode);

            let (counter, max) = (in_flight.clone(), peak.clone());
            let report = scheduler
                .run((0..20u64).collect(), move |i| {
                    let (counter, max) = (counter.clone(), max.clone());
                    async move {
                        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        max.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5 + i % 7)).await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(())
                    }
                })
                .await;

            assert_eq!(report.total, 20);
            assert_eq!(report.succeeded, 20);
            assert_eq!(peak.load(Ordering::SeqCst), 3, "mode {}", mode);
            assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_waits_for_whole_batch() {
        let scheduler = BatchScheduler::new(2, SchedulerMode::Barrier);
        let marks = run_logged(scheduler, vec![100, 10, 10, 10, 50]).await;

        for index in 2..5 {
            let start = position(&marks, Mark::Start(index));
            let previous_batch = (index / 2 - 1) * 2;
            for done in previous_batch..previous_batch + 2 {
                assert!(position(&marks, Mark::End(done)) < start);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_refills_immediately() {
        let scheduler = BatchScheduler::new(2, SchedulerMode::WorkerPool);
        let marks = run_logged(scheduler, vec![100, 10, 10, 10]).await;

        // Item 0 is still running while the second worker works through the rest
        assert!(position(&marks, Mark::Start(3)) < position(&marks, Mark::End(0)));
        assert_eq!(marks.len(), 8);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        for mode in [SchedulerMode::WorkerPool, SchedulerMode::Barrier] {
            let scheduler = BatchScheduler::new(2, mode);
            let report = scheduler
                .run(vec![0, 1, 2, 3, 4, 5], |i| async move {
                    match i % 3 {
                        0 => Ok(i),
                        1 => Err(format!("item {} failed", i)),
                        _ => panic!("item {} exploded", i),
                    }
                })
                .await;

            assert_eq!(
                report,
                BatchReport {
                    total: 6,
                    succeeded: 2,
                    failed: 2,
                    panicked: 2
                }
            );
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let scheduler = BatchScheduler::new(0, SchedulerMode::WorkerPool);
        assert_eq!(scheduler.limit(), 1);

        let report = scheduler
            .run(Vec::<u32>::new(), |_| async { Ok::<_, String>(()) })
            .await;
        assert_eq!(report, BatchReport::default());
        assert_eq!(report.to_string(), "0 items: 0 succeeded, 0 failed, 0 panicked");
    }
}
