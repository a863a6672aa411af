use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::JobExecutor;
use super::types::{Job, Submission};
use crate::registry::Registry;

/// Destination for jobs produced by the scheduler
pub trait JobQueue: Send + Sync {
    /// Hand over a job without blocking
    fn submit(&self, job: Job) -> Submission;
}

/// Fixed set of workers draining a bounded job queue.
///
/// Submission never blocks: when the queue is full the job is dropped and
/// the caller is told so. Each job runs inside a fault boundary, and the
/// monitor's running flag is cleared exactly once after it, however the
/// job ended.
pub struct WorkerPool {
    workers: usize,
    capacity: usize,
    sender: mpsc::Sender<Job>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    executor: Arc<JobExecutor>,
}

impl WorkerPool {
    /// Create a pool of `workers` workers over a queue of `capacity` jobs.
    ///
    /// Both must be non-zero; the config layer validates them.
    pub fn new(workers: usize, capacity: usize, executor: Arc<JobExecutor>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        Self {
            workers,
            capacity: capacity.max(1),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            executor,
        }
    }

    /// Spawn the workers. They run until `cancel` fires, finishing the job
    /// they are on before exiting.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!("Starting monitor worker pool with {} workers (queue capacity {})", self.workers, self.capacity);

        (0..self.workers)
            .map(|worker_id| {
                let receiver = self.receiver.clone();
                let executor = self.executor.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(worker_id, receiver, executor, cancel))
            })
            .collect()
    }

    /// Wait for the workers to exit, then release reservations of jobs that
    /// were still queued so their monitors are not left marked running.
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task terminated abnormally: {}", e);
            }
        }

        let mut receiver = self.receiver.lock().await;
        let mut released = 0usize;
        while let Ok(job) = receiver.try_recv() {
            release(&self.executor, &job).await;
            released += 1;
        }

        info!("Worker pool stopped ({} queued jobs abandoned)", released);
    }

    /// Number of jobs waiting in the queue
    pub fn queued(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl JobQueue for WorkerPool {
    fn submit(&self, job: Job) -> Submission {
        match self.sender.try_send(job) {
            Ok(()) => Submission::Queued,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Worker pool job queue is full, dropping health check job for monitor {}", job.monitor_id);
                Submission::Dropped
            }
            // The pool owns the receiver, so this only happens while tearing down
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!("Worker pool is closed, dropping health check job for monitor {}", job.monitor_id);
                Submission::Dropped
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    executor: Arc<JobExecutor>,
    cancel: CancellationToken,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = next_job(&receiver) => match job {
                Some(job) => job,
                None => break,
            },
        };

        // Not raced against cancellation: in-flight jobs run to completion
        process_job(&executor, job).await;
    }

    debug!("Worker {} stopped", worker_id);
}

async fn next_job(receiver: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    receiver.lock().await.recv().await
}

/// Run one job inside a fault boundary, then clear its running flag
async fn process_job(executor: &JobExecutor, job: Job) {
    let result = AssertUnwindSafe(executor.run(&job)).catch_unwind().await;

    if let Err(panic) = result {
        error!("Job panic recovered for monitor {} ({}): {}", job.monitor_id, job.url, panic_message(&*panic));
    }

    release(executor, &job).await;
}

async fn release(executor: &JobExecutor, job: &Job) {
    release_reservation(executor.registry().as_ref(), job.monitor_id).await;
}

/// Attempts at clearing a running flag before giving up on it
const RELEASE_ATTEMPTS: u32 = 4;

/// Delay before the first retry; doubled for each later one
const RELEASE_BACKOFF: Duration = Duration::from_millis(50);

/// Clear a monitor's running flag, retrying transient registry failures.
///
/// A flag left set keeps the monitor from ever being due again, so errors
/// other than `NotFound` are retried with backoff before being logged.
pub(crate) async fn release_reservation(registry: &dyn Registry, monitor_id: Uuid) -> bool {
    let mut backoff = RELEASE_BACKOFF;

    for attempt in 1..=RELEASE_ATTEMPTS {
        match registry.set_running(monitor_id, false).await {
            Ok(()) => return true,
            Err(e) if e.is_not_found() => {
                debug!("Monitor {} removed before its running flag was cleared", monitor_id);
                return true;
            }
            Err(e) if attempt < RELEASE_ATTEMPTS => {
                warn!(
                    "Failed to clear running flag for monitor {} (attempt {}/{}): {}",
                    monitor_id, attempt, RELEASE_ATTEMPTS, e
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                error!(
                    "Giving up on clearing running flag for monitor {} after {} attempts: {}",
                    monitor_id, RELEASE_ATTEMPTS, e
                );
            }
        }
    }

    false
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Monitor;
    use crate::monitoring::checker::Checker;
    use crate::monitoring::types::ProbeOutcome;
    use crate::registry::testing::FlakyRegistry;
    use crate::registry::{InMemoryRegistry, Registry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Healthy checker that panics on URLs containing "panic" and can be
    /// held at a gate to keep workers busy
    struct TestChecker {
        gate: Option<Arc<Semaphore>>,
        started: AtomicUsize,
    }

    #[async_trait]
    impl Checker for TestChecker {
        async fn check(&self, url: &str) -> ProbeOutcome {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if url.contains("panic") {
                panic!("checker blew up on {url}");
            }
            ProbeOutcome::Response { status_code: 200, latency: Duration::from_millis(5) }
        }
    }

    fn pool_with(
        registry: Arc<InMemoryRegistry>,
        checker: Arc<TestChecker>,
        workers: usize,
        capacity: usize,
    ) -> WorkerPool {
        let executor = Arc::new(JobExecutor::new(
            registry,
            checker,
            None,
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        WorkerPool::new(workers, capacity, executor)
    }

    async fn reserved_monitor(registry: &InMemoryRegistry, url: &str) -> Job {
        let monitor = Monitor::new("alice", url, Duration::from_secs(10)).unwrap();
        registry.add(&monitor).await.unwrap();
        registry.set_running(monitor.id, true).await.unwrap();
        Job::from(&monitor)
    }

    async fn wait_until_idle(registry: &InMemoryRegistry) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if registry.list_all().await.unwrap().iter().all(|m| !m.running) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("monitors still running");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let registry = Arc::new(InMemoryRegistry::new());
        let checker = Arc::new(TestChecker { gate: None, started: AtomicUsize::new(0) });
        // No workers started: nothing drains the queue
        let pool = pool_with(registry.clone(), checker, 2, 3);

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            let job = reserved_monitor(&registry, "http://example.test").await;
            outcomes.push(pool.submit(job));
        }

        assert_eq!(outcomes.iter().filter(|o| **o == Submission::Queued).count(), 3);
        assert_eq!(outcomes.iter().filter(|o| **o == Submission::Dropped).count(), 2);
        assert_eq!(&outcomes[3..], &[Submission::Dropped, Submission::Dropped]);
        assert_eq!(pool.queued(), 3);
    }

    #[tokio::test]
    async fn test_busy_workers_leave_exactly_capacity_queued() {
        let registry = Arc::new(InMemoryRegistry::new());
        let gate = Arc::new(Semaphore::new(0));
        let checker = Arc::new(TestChecker { gate: Some(gate.clone()), started: AtomicUsize::new(0) });
        let pool = pool_with(registry.clone(), checker.clone(), 2, 4);
        let cancel = CancellationToken::new();
        let handles = pool.start(cancel.clone());

        // Occupy both workers
        for _ in 0..2 {
            let job = reserved_monitor(&registry, "http://example.test").await;
            assert_eq!(pool.submit(job), Submission::Queued);
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while checker.started.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut dropped = 0;
        for _ in 0..7 {
            let job = reserved_monitor(&registry, "http://example.test").await;
            if pool.submit(job) == Submission::Dropped {
                dropped += 1;
            }
        }
        assert_eq!(pool.queued(), 4);
        assert_eq!(dropped, 3);

        gate.add_permits(100);
        cancel.cancel();
        pool.shutdown(handles).await;
    }

    #[tokio::test]
    async fn test_jobs_run_and_release_running_flag() {
        let registry = Arc::new(InMemoryRegistry::new());
        let checker = Arc::new(TestChecker { gate: None, started: AtomicUsize::new(0) });
        let pool = pool_with(registry.clone(), checker, 3, 10);
        let cancel = CancellationToken::new();
        let handles = pool.start(cancel.clone());

        for _ in 0..6 {
            let job = reserved_monitor(&registry, "http://example.test").await;
            assert_eq!(pool.submit(job), Submission::Queued);
        }

        wait_until_idle(&registry).await;
        for monitor in registry.list_all().await.unwrap() {
            assert!(monitor.observation.healthy);
            assert_eq!(monitor.observation.status_code, 200);
        }

        cancel.cancel();
        pool.shutdown(handles).await;
    }

    #[tokio::test]
    async fn test_panicking_job_still_clears_running_and_worker_survives() {
        let registry = Arc::new(InMemoryRegistry::new());
        let checker = Arc::new(TestChecker { gate: None, started: AtomicUsize::new(0) });
        // A single worker must survive the panic to process the next job
        let pool = pool_with(registry.clone(), checker, 1, 10);
        let cancel = CancellationToken::new();
        let handles = pool.start(cancel.clone());

        let bad = reserved_monitor(&registry, "http://panic.test").await;
        let good = reserved_monitor(&registry, "http://example.test").await;
        assert_eq!(pool.submit(bad.clone()), Submission::Queued);
        assert_eq!(pool.submit(good.clone()), Submission::Queued);

        wait_until_idle(&registry).await;

        let monitors = registry.list_all().await.unwrap();
        let bad_state = monitors.iter().find(|m| m.id == bad.monitor_id).unwrap();
        let good_state = monitors.iter().find(|m| m.id == good.monitor_id).unwrap();
        assert!(!bad_state.running);
        assert_eq!(bad_state.observation.last_checked, None, "faulted job stores no observation");
        assert!(!good_state.running);
        assert!(good_state.observation.healthy);

        cancel.cancel();
        pool.shutdown(handles).await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_queued_reservations() {
        let registry = Arc::new(InMemoryRegistry::new());
        let checker = Arc::new(TestChecker { gate: None, started: AtomicUsize::new(0) });
        let pool = pool_with(registry.clone(), checker, 2, 10);

        let cancel = CancellationToken::new();
        cancel.cancel();
        // Workers see the cancellation before any job
        let handles = pool.start(cancel);

        for _ in 0..3 {
            let job = reserved_monitor(&registry, "http://example.test").await;
            pool.submit(job);
        }
        pool.shutdown(handles).await;

        assert_eq!(pool.queued(), 0);
        for monitor in registry.list_all().await.unwrap() {
            assert!(!monitor.running);
            assert_eq!(monitor.observation.last_checked, None);
        }
    }

    #[tokio::test]
    async fn test_transient_release_failure_is_retried() {
        let registry = Arc::new(FlakyRegistry::failing_releases(2));
        let checker = Arc::new(TestChecker { gate: None, started: AtomicUsize::new(0) });
        let executor = Arc::new(JobExecutor::new(
            registry.clone(),
            checker,
            None,
            Duration::from_secs(1),
            Duration::from_secs(5),
        ));
        let pool = WorkerPool::new(1, 4, executor);

        let monitor = Monitor::new("alice", "http://example.test", Duration::from_secs(10)).unwrap();
        registry.add(&monitor).await.unwrap();
        registry.set_running(monitor.id, true).await.unwrap();

        let cancel = CancellationToken::new();
        let handles = pool.start(cancel.clone());
        assert_eq!(pool.submit(Job::from(&monitor)), Submission::Queued);

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.list_all().await.unwrap()[0].running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("running flag was never cleared");

        cancel.cancel();
        pool.shutdown(handles).await;

        let stored = registry.list_all().await.unwrap().remove(0);
        assert!(stored.observation.last_checked.is_some());
        assert_eq!(registry.release_attempts(), 3);
    }

    #[tokio::test]
    async fn test_release_gives_up_after_bounded_attempts() {
        let registry = FlakyRegistry::failing_releases(usize::MAX);
        let monitor = Monitor::new("alice", "http://example.test", Duration::from_secs(10)).unwrap();
        registry.add(&monitor).await.unwrap();
        registry.set_running(monitor.id, true).await.unwrap();

        assert!(!release_reservation(&registry, monitor.id).await);
        assert_eq!(registry.release_attempts(), RELEASE_ATTEMPTS as usize);
        assert!(registry.list_all().await.unwrap()[0].running);
    }

    #[tokio::test]
    async fn test_release_of_removed_monitor_is_not_retried() {
        let registry = FlakyRegistry::failing_releases(0);
        assert!(release_reservation(&registry, Uuid::new_v4()).await);
        assert_eq!(registry.release_attempts(), 1);
    }
}
