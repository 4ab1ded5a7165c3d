//! Queue runtime: registration, dispatch loops, worker leases, retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadpipe_config::QueueSettings;
use leadpipe_core::{Error, Result};

use crate::backoff::retry_delay;
use crate::job::{
    EnqueueOptions, Job, JobError, JobEvent, JobHandler, JobId, JobPayload, JobState, QueueStats,
};

/// How long a dispatcher sleeps when idle before re-checking for due jobs.
const DISPATCH_POLL: Duration = Duration::from_millis(50);

struct QueueRuntime {
    name: String,
    settings: QueueSettings,
    handler: Arc<dyn JobHandler>,
    paused: AtomicBool,
    wake: Notify,
    permits: Arc<Semaphore>,
}

struct Inner {
    jobs: DashMap<JobId, Job>,
    queues: DashMap<String, Arc<QueueRuntime>>,
    seq: AtomicU64,
    shut_down: AtomicBool,
    events_tx: mpsc::UnboundedSender<JobEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<JobEvent>>>,
    dispatchers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

/// In-process job queue over an opaque concurrent job table.
///
/// One `JobQueue` hosts any number of named queues, each with its own
/// settings, handler and worker pool. Jobs stay in the table after they
/// settle so terminal state and `last_error` remain queryable.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                jobs: DashMap::new(),
                queues: DashMap::new(),
                seq: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                events_tx,
                events_rx: parking_lot::Mutex::new(Some(events_rx)),
                dispatchers: parking_lot::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a named queue and start its dispatcher.
    pub fn register(
        &self,
        name: &str,
        settings: QueueSettings,
        handler: Arc<dyn JobHandler>,
    ) {
        let runtime = Arc::new(QueueRuntime {
            name: name.to_string(),
            permits: Arc::new(Semaphore::new(settings.concurrency)),
            settings,
            handler,
            paused: AtomicBool::new(false),
            wake: Notify::new(),
        });
        self.inner.queues.insert(name.to_string(), runtime.clone());

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            run_dispatcher(inner, runtime).await;
        });
        self.inner.dispatchers.lock().push(handle);
        info!(queue = name, "Queue registered");
    }

    /// Enqueue a job. Fire-and-forget: returns as soon as the job is stored.
    pub fn enqueue(
        &self,
        queue: &str,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return Err(Error::QueueUnavailable("queue is shut down".to_string()));
        }
        let runtime = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| Error::UnknownQueue(queue.to_string()))?
            .clone();

        if payload.queue_name() != queue {
            return Err(Error::Config(format!(
                "Payload kind belongs on queue '{}', not '{}'",
                payload.queue_name(),
                queue
            )));
        }

        let now = Utc::now();
        let (state, next_run_at) = match options.delay {
            Some(delay) if !delay.is_zero() => (
                JobState::Delayed,
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default()),
            ),
            _ => (JobState::Waiting, None),
        };

        let job = Job {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload,
            state,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(runtime.settings.max_attempts),
            priority: options.priority,
            next_run_at,
            last_error: None,
            lease_expires_at: None,
            created_at: now,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
        };
        let id = job.id;
        debug!(queue, job_id = %id, state = ?state, "Job enqueued");
        self.inner.jobs.insert(id, job);
        runtime.wake.notify_one();
        Ok(id)
    }

    /// Non-blocking snapshot of one queue's counts.
    pub fn stats(&self, queue: &str) -> Result<QueueStats> {
        if !self.inner.queues.contains_key(queue) {
            return Err(Error::UnknownQueue(queue.to_string()));
        }
        let mut stats = QueueStats::default();
        for entry in self.inner.jobs.iter() {
            if entry.queue != queue {
                continue;
            }
            match entry.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
                JobState::Delayed => stats.delayed += 1,
            }
        }
        Ok(stats)
    }

    /// Per-queue snapshots for every registered queue.
    pub fn all_stats(&self) -> HashMap<String, QueueStats> {
        self.inner
            .queues
            .iter()
            .filter_map(|entry| {
                self.stats(entry.key())
                    .ok()
                    .map(|stats| (entry.key().clone(), stats))
            })
            .collect()
    }

    /// Stop dispatching new jobs on a queue. Queued jobs are kept; active
    /// jobs run to completion.
    pub fn pause(&self, queue: &str) -> Result<()> {
        let runtime = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| Error::UnknownQueue(queue.to_string()))?;
        runtime.paused.store(true, Ordering::SeqCst);
        info!(queue, "Queue paused");
        Ok(())
    }

    pub fn resume(&self, queue: &str) -> Result<()> {
        let runtime = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| Error::UnknownQueue(queue.to_string()))?;
        runtime.paused.store(false, Ordering::SeqCst);
        runtime.wake.notify_one();
        info!(queue, "Queue resumed");
        Ok(())
    }

    /// Read one job's current record.
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.inner.jobs.get(&id).map(|j| j.clone())
    }

    /// Take the event stream. Single consumer; subsequent calls return None.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.inner.events_rx.lock().take()
    }

    /// Stop all dispatchers and wait for in-flight workers to settle.
    pub async fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        for entry in self.inner.queues.iter() {
            entry.wake.notify_one();
        }
        let handles: Vec<_> = self.inner.dispatchers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        // Dispatchers are gone; draining every permit means every worker
        // task has dropped its permit and settled its job.
        for entry in self.inner.queues.iter() {
            let concurrency = entry.settings.concurrency as u32;
            let _ = entry.permits.acquire_many(concurrency).await;
        }
        info!("Job queue shut down");
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_dispatcher(inner: Arc<Inner>, runtime: Arc<QueueRuntime>) {
    loop {
        if inner.shut_down.load(Ordering::SeqCst) {
            break;
        }
        if runtime.paused.load(Ordering::SeqCst) {
            idle(&runtime).await;
            continue;
        }

        reclaim_expired_leases(&inner, &runtime);

        let permit = match runtime.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                idle(&runtime).await;
                continue;
            }
        };

        match claim_next(&inner, &runtime) {
            Some(job) => {
                let inner = inner.clone();
                let runtime = runtime.clone();
                tokio::spawn(async move {
                    run_worker(inner, runtime, job, permit).await;
                });
            }
            None => {
                drop(permit);
                idle(&runtime).await;
            }
        }
    }
}

async fn idle(runtime: &QueueRuntime) {
    let _ = tokio::time::timeout(DISPATCH_POLL, runtime.wake.notified()).await;
}

/// Return jobs whose active lease expired (worker crashed or hung past the
/// lease) to the retry path. The crashed attempt counts as one attempt.
fn reclaim_expired_leases(inner: &Arc<Inner>, runtime: &Arc<QueueRuntime>) {
    let now = Utc::now();
    let expired: Vec<(JobId, u32)> = inner
        .jobs
        .iter()
        .filter(|j| {
            j.queue == runtime.name
                && j.state == JobState::Active
                && j.lease_expires_at.map(|t| t < now).unwrap_or(false)
        })
        .map(|j| (j.id, j.attempts))
        .collect();

    for (id, attempts) in expired {
        warn!(queue = %runtime.name, job_id = %id, "Reclaiming expired job lease");
        settle_failure(
            inner,
            runtime,
            id,
            attempts,
            JobError::retryable("processing lease expired"),
        );
    }
}

/// Claim the next due job: FIFO within priority, delayed jobs once due.
fn claim_next(inner: &Arc<Inner>, runtime: &Arc<QueueRuntime>) -> Option<Job> {
    let now = Utc::now();
    let candidate = inner
        .jobs
        .iter()
        .filter(|j| {
            j.queue == runtime.name
                && match j.state {
                    JobState::Waiting => true,
                    JobState::Delayed => j.next_run_at.map(|t| t <= now).unwrap_or(true),
                    _ => false,
                }
        })
        .min_by_key(|j| (std::cmp::Reverse(j.priority), j.seq))
        .map(|j| j.id)?;

    let mut job = inner.jobs.get_mut(&candidate)?;
    // Single dispatcher per queue, so the state cannot have raced to Active;
    // re-check anyway before taking the lease.
    if !matches!(job.state, JobState::Waiting | JobState::Delayed) {
        return None;
    }
    job.state = JobState::Active;
    job.attempts += 1;
    job.next_run_at = None;
    job.lease_expires_at = Some(
        now + chrono::Duration::milliseconds(runtime.settings.lease_timeout_ms as i64),
    );
    Some(job.clone())
}

async fn run_worker(
    inner: Arc<Inner>,
    runtime: Arc<QueueRuntime>,
    job: Job,
    permit: OwnedSemaphorePermit,
) {
    debug!(queue = %runtime.name, job_id = %job.id, attempt = job.attempts, "Worker picked up job");
    let lease = Duration::from_millis(runtime.settings.lease_timeout_ms);

    let outcome = tokio::time::timeout(lease, runtime.handler.handle(&job)).await;
    match outcome {
        Ok(Ok(())) => settle_success(&inner, &runtime, job.id, job.attempts),
        Ok(Err(err)) => settle_failure(&inner, &runtime, job.id, job.attempts, err),
        Err(_) => settle_failure(
            &inner,
            &runtime,
            job.id,
            job.attempts,
            JobError::retryable(format!("processing timed out after {:?}", lease)),
        ),
    }

    drop(permit);
    runtime.wake.notify_one();
}

fn settle_success(inner: &Arc<Inner>, runtime: &Arc<QueueRuntime>, id: JobId, attempt: u32) {
    let settled = {
        let mut job = match inner.jobs.get_mut(&id) {
            Some(job) => job,
            None => return,
        };
        // A reclaimed lease may have already settled this attempt.
        if job.state != JobState::Active || job.attempts != attempt {
            return;
        }
        job.state = JobState::Completed;
        job.lease_expires_at = None;
        job.clone()
    };
    debug!(queue = %runtime.name, job_id = %id, "Job completed");
    let _ = inner.events_tx.send(JobEvent::Completed { job: settled });
}

fn settle_failure(
    inner: &Arc<Inner>,
    runtime: &Arc<QueueRuntime>,
    id: JobId,
    attempt: u32,
    err: JobError,
) {
    let (settled, terminal) = {
        let mut job = match inner.jobs.get_mut(&id) {
            Some(job) => job,
            None => return,
        };
        if job.state != JobState::Active || job.attempts != attempt {
            return;
        }
        job.last_error = Some(err.message.clone());
        job.lease_expires_at = None;

        if !err.retryable || job.attempts >= job.max_attempts {
            job.state = JobState::Failed;
            (job.clone(), true)
        } else {
            let delay = retry_delay(
                Duration::from_millis(runtime.settings.base_backoff_ms),
                Duration::from_millis(runtime.settings.max_backoff_ms),
                job.attempts,
            );
            job.state = JobState::Delayed;
            job.next_run_at =
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
            (job.clone(), false)
        }
    };

    if terminal {
        warn!(
            queue = %runtime.name,
            job_id = %id,
            attempts = settled.attempts,
            error = %err.message,
            "Job failed terminally"
        );
    } else {
        debug!(
            queue = %runtime.name,
            job_id = %id,
            attempt = settled.attempts,
            error = %err.message,
            "Job attempt failed, retry scheduled"
        );
    }
    let _ = inner.events_tx.send(JobEvent::Failed {
        job: settled,
        terminal,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn test_settings(concurrency: usize, max_attempts: u32) -> QueueSettings {
        QueueSettings {
            concurrency,
            max_attempts,
            base_backoff_ms: 10,
            max_backoff_ms: 100,
            lease_timeout_ms: 5_000,
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first: usize,
        retryable: bool,
    }

    impl CountingHandler {
        fn succeed() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                retryable: true,
            })
        }

        fn fail_first(n: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: n,
                retryable: true,
            })
        }

        fn fail_permanent() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first: usize::MAX,
                retryable: false,
            })
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                if self.retryable {
                    Err(JobError::retryable("induced failure"))
                } else {
                    Err(JobError::permanent("induced permanent failure"))
                }
            } else {
                Ok(())
            }
        }
    }

    async fn wait_for_state(queue: &JobQueue, id: JobId, state: JobState) -> Job {
        for _ in 0..400 {
            if let Some(job) = queue.job(id) {
                if job.state == state {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", id, state);
    }

    fn ai_payload() -> JobPayload {
        JobPayload::AiProcessing {
            lead_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_and_complete() {
        let queue = JobQueue::new();
        let handler = CountingHandler::succeed();
        queue.register(crate::names::AI_PROCESSING, test_settings(2, 5), handler.clone());

        let id = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        let job = wait_for_state(&queue, id, JobState::Completed).await;
        assert_eq!(job.attempts, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let queue = JobQueue::new();
        let handler = CountingHandler::fail_first(2);
        queue.register(crate::names::AI_PROCESSING, test_settings(1, 5), handler.clone());

        let id = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        let job = wait_for_state(&queue, id, JobState::Completed).await;
        assert_eq!(job.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminal_failure_after_max_attempts() {
        let queue = JobQueue::new();
        let mut events = queue.take_event_receiver().unwrap();
        let handler = CountingHandler::fail_first(usize::MAX);
        queue.register(crate::names::AI_PROCESSING, test_settings(1, 3), handler.clone());

        let id = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        let job = wait_for_state(&queue, id, JobState::Failed).await;
        assert_eq!(job.attempts, 3);
        assert_eq!(job.last_error.as_deref(), Some("induced failure"));

        let mut saw_terminal = false;
        while let Ok(event) = events.try_recv() {
            if let JobEvent::Failed { terminal: true, job } = event {
                assert_eq!(job.id, id);
                saw_terminal = true;
            }
        }
        assert!(saw_terminal);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_retryable_error_goes_terminal_immediately() {
        let queue = JobQueue::new();
        let handler = CountingHandler::fail_permanent();
        queue.register(crate::names::AI_PROCESSING, test_settings(1, 5), handler.clone());

        let id = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        let job = wait_for_state(&queue, id, JobState::Failed).await;
        assert_eq!(job.attempts, 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_blocks_dispatch_and_resume_recovers() {
        let queue = JobQueue::new();
        let handler = CountingHandler::succeed();
        queue.register(crate::names::EXPORT, test_settings(1, 5), handler.clone());
        queue.pause(crate::names::EXPORT).unwrap();

        let id = queue
            .enqueue(
                crate::names::EXPORT,
                JobPayload::Export {
                    lead_id: Uuid::new_v4(),
                },
                EnqueueOptions::default(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(queue.job(id).unwrap().state, JobState::Waiting);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        queue.resume(crate::names::EXPORT).unwrap();
        wait_for_state(&queue, id, JobState::Completed).await;
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let queue = JobQueue::new();
        queue.register(
            crate::names::AI_PROCESSING,
            test_settings(1, 5),
            CountingHandler::succeed(),
        );
        queue.pause(crate::names::AI_PROCESSING).unwrap();

        queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        queue
            .enqueue(
                crate::names::AI_PROCESSING,
                ai_payload(),
                EnqueueOptions {
                    delay: Some(Duration::from_secs(60)),
                    ..Default::default()
                },
            )
            .unwrap();

        let stats = queue.stats(crate::names::AI_PROCESSING).unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.active, 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_payload_queue_mismatch_rejected() {
        let queue = JobQueue::new();
        queue.register(
            crate::names::EXPORT,
            test_settings(1, 5),
            CountingHandler::succeed(),
        );
        let err = queue
            .enqueue(crate::names::EXPORT, ai_payload(), EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let queue = JobQueue::new();
        queue.register(
            crate::names::AI_PROCESSING,
            test_settings(1, 5),
            CountingHandler::succeed(),
        );
        queue.shutdown().await;
        let err = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::QueueUnavailable(_)));
    }

    struct SlowFirstHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for SlowFirstHandler {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), JobError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_exceeding_lease_is_timed_out_and_retried() {
        let queue = JobQueue::new();
        let handler = Arc::new(SlowFirstHandler {
            calls: AtomicUsize::new(0),
        });
        queue.register(
            crate::names::AI_PROCESSING,
            QueueSettings {
                concurrency: 1,
                max_attempts: 5,
                base_backoff_ms: 10,
                max_backoff_ms: 50,
                lease_timeout_ms: 100,
            },
            handler.clone(),
        );

        let id = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        // First attempt hangs past the lease; the worker is timed out and
        // the job comes back for a second attempt
        let job = wait_for_state(&queue, id, JobState::Completed).await;
        assert_eq!(job.attempts, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(job.last_error.unwrap().contains("timed out"));
        queue.shutdown().await;
    }

    struct PanicOnceHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for PanicOnceHandler {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), JobError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("worker crashed");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_crashed_worker_lease_is_reclaimed() {
        let queue = JobQueue::new();
        let handler = Arc::new(PanicOnceHandler {
            calls: AtomicUsize::new(0),
        });
        queue.register(
            crate::names::AI_PROCESSING,
            QueueSettings {
                concurrency: 1,
                max_attempts: 5,
                base_backoff_ms: 10,
                max_backoff_ms: 50,
                lease_timeout_ms: 100,
            },
            handler.clone(),
        );

        let id = queue
            .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
            .unwrap();
        // The crashed worker never settles its job; the dispatcher reclaims
        // the expired lease and the retry succeeds. The crash counts as one
        // attempt.
        let job = wait_for_state(&queue, id, JobState::Completed).await;
        assert_eq!(job.attempts, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(job.last_error.unwrap().contains("lease expired"));
        queue.shutdown().await;
    }

    struct ParallelTracker {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for ParallelTracker {
        async fn handle(&self, _job: &Job) -> std::result::Result<(), JobError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let queue = JobQueue::new();
        let tracker = Arc::new(ParallelTracker {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        queue.register(crate::names::AI_PROCESSING, test_settings(2, 5), tracker.clone());

        let ids: Vec<_> = (0..6)
            .map(|_| {
                queue
                    .enqueue(crate::names::AI_PROCESSING, ai_payload(), EnqueueOptions::default())
                    .unwrap()
            })
            .collect();
        for id in ids {
            wait_for_state(&queue, id, JobState::Completed).await;
        }
        assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_priority_dispatch_order() {
        let queue = JobQueue::new();
        let order: Arc<parking_lot::Mutex<Vec<u8>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));

        struct OrderHandler {
            order: Arc<parking_lot::Mutex<Vec<u8>>>,
        }

        #[async_trait]
        impl JobHandler for OrderHandler {
            async fn handle(&self, job: &Job) -> std::result::Result<(), JobError> {
                self.order.lock().push(job.priority);
                Ok(())
            }
        }

        queue.register(
            crate::names::AI_PROCESSING,
            test_settings(1, 5),
            Arc::new(OrderHandler {
                order: order.clone(),
            }),
        );
        queue.pause(crate::names::AI_PROCESSING).unwrap();

        let mut ids = Vec::new();
        for priority in [0u8, 5, 1] {
            ids.push(
                queue
                    .enqueue(
                        crate::names::AI_PROCESSING,
                        ai_payload(),
                        EnqueueOptions {
                            priority,
                            ..Default::default()
                        },
                    )
                    .unwrap(),
            );
        }
        queue.resume(crate::names::AI_PROCESSING).unwrap();
        for id in &ids {
            wait_for_state(&queue, *id, JobState::Completed).await;
        }
        assert_eq!(*order.lock(), vec![5, 1, 0]);
        queue.shutdown().await;
    }
}
