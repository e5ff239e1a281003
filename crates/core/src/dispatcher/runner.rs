//! Dispatcher implementation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::job::{RenderingRequest, RequestError};
use crate::metrics;
use crate::pipeline::{JobOutcome, PipelineController};
use crate::queue::{JobQueue, LeaseKeeper, LeasedMessage, QueueError};

use super::config::{DispatcherConfig, LeasePolicy};
use super::types::DispatcherStatus;

#[derive(Default)]
struct DispatcherStats {
    in_flight: AtomicUsize,
    leased: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    poison: AtomicU64,
    deferred: AtomicU64,
}

/// Counts a job as in flight for as long as it is alive, panics included.
struct InFlightGuard {
    stats: Arc<DispatcherStats>,
}

impl InFlightGuard {
    fn new(stats: Arc<DispatcherStats>) -> Self {
        stats.in_flight.fetch_add(1, Ordering::SeqCst);
        metrics::JOBS_IN_FLIGHT.inc();
        Self { stats }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::JOBS_IN_FLIGHT.dec();
    }
}

/// Ids of the jobs currently running in this process.
#[derive(Default)]
struct ActiveJobs {
    ids: StdMutex<HashSet<String>>,
}

impl ActiveJobs {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // the set stays consistent even if a holder panicked
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claims `id`, or returns `None` if a job with that id is running.
    fn claim(self: &Arc<Self>, id: &str) -> Option<ActiveJobClaim> {
        if !self.lock().insert(id.to_string()) {
            return None;
        }
        Some(ActiveJobClaim {
            jobs: Arc::clone(self),
            id: id.to_string(),
        })
    }
}

/// Releases the job id when the job task ends, panics included.
struct ActiveJobClaim {
    jobs: Arc<ActiveJobs>,
    id: String,
}

impl Drop for ActiveJobClaim {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.id);
    }
}

/// Everything the polling loop and job tasks share.
#[derive(Clone)]
struct Shared {
    queue: Arc<dyn JobQueue>,
    controller: Arc<PipelineController>,
    policy: LeasePolicy,
    semaphore: Arc<Semaphore>,
    stats: Arc<DispatcherStats>,
    active: Arc<ActiveJobs>,
}

/// Leases rendering requests and runs them with bounded concurrency.
pub struct Dispatcher {
    config: DispatcherConfig,
    poll_interval: Duration,
    shared: Shared,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        config: DispatcherConfig,
        policy: LeasePolicy,
        queue: Arc<dyn JobQueue>,
        controller: Arc<PipelineController>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        Self {
            poll_interval: config.poll_interval(),
            config,
            shared: Shared {
                queue,
                controller,
                policy,
                semaphore,
                stats: Arc::new(DispatcherStats::default()),
                active: Arc::new(ActiveJobs::default()),
            },
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Overrides the configured poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start the polling loop in the background.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return;
        }

        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "Starting dispatcher"
        );

        let handle = tokio::spawn(run_loop(
            self.shared.clone(),
            Arc::clone(&self.running),
            self.poll_interval,
            self.shutdown_tx.subscribe(),
        ));
        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stop leasing and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Dispatcher not running");
            return;
        }

        info!("Stopping dispatcher");
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher loop ended abnormally: {}", e);
            }
        }
        info!("Dispatcher stopped");
    }

    /// Runs until `signal` resolves, then shuts down gracefully.
    pub async fn run_until<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        self.start().await;
        signal.await;
        self.stop().await;
    }

    /// Get current dispatcher status.
    pub fn status(&self) -> DispatcherStatus {
        let stats = &self.shared.stats;
        DispatcherStatus {
            running: self.running.load(Ordering::Relaxed),
            in_flight: stats.in_flight.load(Ordering::SeqCst),
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            leased_total: stats.leased.load(Ordering::Relaxed),
            succeeded_total: stats.succeeded.load(Ordering::Relaxed),
            failed_total: stats.failed.load(Ordering::Relaxed),
            poison_total: stats.poison.load(Ordering::Relaxed),
            deferred_total: stats.deferred.load(Ordering::Relaxed),
        }
    }
}

async fn run_loop(
    shared: Shared,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut jobs = JoinSet::new();

    info!("Dispatcher loop started");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Dispatcher loop received shutdown signal");
                break;
            }
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                reap(joined);
            }
            _ = ticker.tick() => {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                poll_once(&shared, &mut jobs).await;
            }
        }
    }

    if !jobs.is_empty() {
        info!(in_flight = jobs.len(), "Waiting for in-flight jobs");
    }
    while let Some(joined) = jobs.join_next().await {
        reap(joined);
    }
    info!("Dispatcher loop stopped");
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Job task panicked; its message will reappear after the lease expires");
        } else {
            warn!("Job task ended abnormally: {}", e);
        }
    }
}

/// Leases at most one message if a slot is free and starts its job.
async fn poll_once(shared: &Shared, jobs: &mut JoinSet<()>) {
    let Ok(permit) = Arc::clone(&shared.semaphore).try_acquire_owned() else {
        debug!("All job slots busy");
        return;
    };

    let message = match shared.queue.lease(shared.policy.visibility).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            metrics::LEASES_TOTAL.with_label_values(&["empty"]).inc();
            return;
        }
        Err(e) => {
            metrics::LEASES_TOTAL.with_label_values(&["error"]).inc();
            warn!("Failed to lease message: {}", e);
            return;
        }
    };

    let request = match RenderingRequest::from_json(&message.body) {
        Ok(request) => request,
        Err(e) => {
            discard_poison(shared, &message, e).await;
            return;
        }
    };

    // A second message for a running job id would share its workspace and
    // result path. It stays leased and reappears once its visibility expires.
    let Some(claim) = shared.active.claim(&request.id) else {
        metrics::LEASES_TOTAL.with_label_values(&["deferred"]).inc();
        shared.stats.deferred.fetch_add(1, Ordering::Relaxed);
        warn!(
            job_id = %request.id,
            message_id = %message.message_id,
            "Job with this id already running, deferring message"
        );
        return;
    };

    metrics::LEASES_TOTAL.with_label_values(&["leased"]).inc();
    shared.stats.leased.fetch_add(1, Ordering::Relaxed);
    info!(
        job_id = %request.id,
        message_id = %message.message_id,
        dequeue_count = message.dequeue_count,
        "Leased job"
    );

    jobs.spawn(run_job(shared.clone(), message, request, permit, claim));
}

/// Deletes a message that can never become a valid job.
async fn discard_poison(shared: &Shared, message: &LeasedMessage, cause: RequestError) {
    let err = match cause {
        RequestError::Json(e) => QueueError::Deserialization {
            message_id: message.message_id.clone(),
            reason: e.to_string(),
        },
        other => QueueError::InvalidRequest {
            message_id: message.message_id.clone(),
            reason: other.to_string(),
        },
    };

    metrics::LEASES_TOTAL.with_label_values(&["poison"]).inc();
    shared.stats.poison.fetch_add(1, Ordering::Relaxed);
    error!(message_id = %message.message_id, error = %err, "Deleting poison message");

    if let Err(e) = shared.queue.delete(message).await {
        warn!(message_id = %message.message_id, error = %e, "Failed to delete poison message");
    }
}

async fn run_job(
    shared: Shared,
    message: LeasedMessage,
    request: RenderingRequest,
    _permit: OwnedSemaphorePermit,
    _claim: ActiveJobClaim,
) {
    let _guard = InFlightGuard::new(Arc::clone(&shared.stats));

    let keeper = LeaseKeeper::start(
        Arc::clone(&shared.queue),
        message,
        shared.policy.renew_interval,
        shared.policy.visibility,
    );
    let outcome = shared.controller.run(request).await;
    let message = keeper.stop().await;

    settle(&shared, &message, &outcome).await;
}

/// Deletes or releases the message according to the job outcome.
async fn settle(shared: &Shared, message: &LeasedMessage, outcome: &JobOutcome) {
    let result = outcome.status.as_str();
    metrics::JOBS_TOTAL.with_label_values(&[result]).inc();
    metrics::JOB_DURATION
        .with_label_values(&[result])
        .observe(outcome.duration().as_secs_f64());

    if outcome.succeeded() {
        shared.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = shared.queue.delete(message).await {
            warn!(job_id = %outcome.id, error = %e, "Failed to delete finished message");
        }
        return;
    }

    shared.stats.failed.fetch_add(1, Ordering::Relaxed);
    if message.dequeue_count < shared.policy.max_delivery_attempts {
        info!(
            job_id = %outcome.id,
            dequeue_count = message.dequeue_count,
            "Releasing failed job for redelivery"
        );
        if let Err(e) = shared.queue.release(message).await {
            warn!(job_id = %outcome.id, error = %e, "Failed to release message");
        }
    } else {
        error!(
            job_id = %outcome.id,
            dequeue_count = message.dequeue_count,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "Delivery attempts exhausted, deleting message"
        );
        if let Err(e) = shared.queue.delete(message).await {
            warn!(job_id = %outcome.id, error = %e, "Failed to delete exhausted message");
        }
    }
}
