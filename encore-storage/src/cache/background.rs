//! Background executor for cache population and invalidation.
//!
//! Cache writes never hold up the request that triggered them. Jobs are
//! pushed onto a bounded queue and run one at a time by a single worker task,
//! each under its own timeout. The caller's cancellation is never observed:
//! once a job is queued it runs even if the request that queued it is gone.
//!
//! A full queue drops the job (logged and counted) instead of blocking the
//! caller. The worst outcome of a dropped population job is an extra miss;
//! the worst outcome of a dropped invalidation is staleness bounded by TTL.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use encore_core::StoreResult;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub const DEFAULT_BACKGROUND_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_BACKGROUND_JOB_TIMEOUT_MS: u64 = 1000;

/// Boxed unit of background work.
pub type BackgroundJob = Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'static>>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the background executor.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// Maximum queued jobs before new ones are dropped (default: 1024)
    pub queue_capacity: usize,

    /// Deadline for a single job (default: 1 second)
    pub job_timeout: Duration,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_BACKGROUND_QUEUE_CAPACITY,
            job_timeout: Duration::from_millis(DEFAULT_BACKGROUND_JOB_TIMEOUT_MS),
        }
    }
}

impl BackgroundConfig {
    /// Create BackgroundConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ENCORE_BACKGROUND_QUEUE_CAPACITY`: Queue bound (default: 1024)
    /// - `ENCORE_BACKGROUND_JOB_TIMEOUT_MS`: Per-job deadline (default: 1000)
    pub fn from_env() -> Self {
        let queue_capacity = std::env::var("ENCORE_BACKGROUND_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_BACKGROUND_QUEUE_CAPACITY);

        let job_timeout = Duration::from_millis(
            std::env::var("ENCORE_BACKGROUND_JOB_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BACKGROUND_JOB_TIMEOUT_MS),
        );

        Self {
            queue_capacity,
            job_timeout,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for background job outcomes.
#[derive(Debug, Default)]
pub struct BackgroundMetrics {
    pub jobs_submitted: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_timed_out: AtomicU64,
    /// Rejected because the queue was full or the worker had stopped
    pub jobs_dropped: AtomicU64,
}

impl BackgroundMetrics {
    pub fn snapshot(&self) -> BackgroundSnapshot {
        BackgroundSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of background metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundSnapshot {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_timed_out: u64,
    pub jobs_dropped: u64,
}

// ============================================================================
// EXECUTOR
// ============================================================================

enum Message {
    Job {
        label: &'static str,
        job: BackgroundJob,
    },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for submitting background jobs.
#[derive(Clone)]
pub struct BackgroundExecutor {
    tx: mpsc::Sender<Message>,
    metrics: Arc<BackgroundMetrics>,
}

/// Owner of the worker task; used for graceful shutdown.
pub struct BackgroundHandle {
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
    metrics: Arc<BackgroundMetrics>,
}

impl BackgroundExecutor {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(config: BackgroundConfig) -> (BackgroundExecutor, BackgroundHandle) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(BackgroundMetrics::default());

        tracing::info!(
            queue_capacity = config.queue_capacity,
            job_timeout_ms = config.job_timeout.as_millis() as u64,
            "Background executor started"
        );

        let worker = tokio::spawn(worker_loop(
            rx,
            config.job_timeout,
            Arc::clone(&metrics),
            shutdown_rx,
        ));

        (
            BackgroundExecutor {
                tx,
                metrics: Arc::clone(&metrics),
            },
            BackgroundHandle {
                shutdown_tx,
                worker,
                metrics,
            },
        )
    }

    /// Queue a job without waiting. Returns false when the job was dropped.
    pub fn submit<F>(&self, label: &'static str, job: F) -> bool
    where
        F: Future<Output = StoreResult<()>> + Send + 'static,
    {
        self.metrics.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(Message::Job {
            label,
            job: Box::pin(job),
        }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.jobs_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = label, "Background queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.jobs_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = label, "Background executor stopped, dropping job");
                false
            }
        }
    }

    /// Wait until every job queued before this call has finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn metrics(&self) -> BackgroundSnapshot {
        self.metrics.snapshot()
    }
}

impl BackgroundHandle {
    /// Signal shutdown, let the worker drain queued jobs, and wait for it.
    pub async fn shutdown(self) -> BackgroundSnapshot {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Background worker terminated abnormally");
        }
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            jobs_completed = snapshot.jobs_completed,
            jobs_failed = snapshot.jobs_failed,
            jobs_timed_out = snapshot.jobs_timed_out,
            jobs_dropped = snapshot.jobs_dropped,
            "Background executor stopped"
        );
        snapshot
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<Message>,
    job_timeout: Duration,
    metrics: Arc<BackgroundMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // A dropped handle detaches the worker; it then runs until every executor clone is gone.
    let mut watching = true;
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                } else if *shutdown_rx.borrow() {
                    rx.close();
                    while let Some(message) = rx.recv().await {
                        run_message(message, job_timeout, &metrics).await;
                    }
                    break;
                }
            }

            message = rx.recv() => match message {
                Some(message) => run_message(message, job_timeout, &metrics).await,
                None => break,
            },
        }
    }
}

async fn run_message(message: Message, job_timeout: Duration, metrics: &BackgroundMetrics) {
    match message {
        Message::Flush(done) => {
            let _ = done.send(());
        }
        Message::Job { label, job } => match tokio::time::timeout(job_timeout, job).await {
            Ok(Ok(())) => {
                metrics.jobs_completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = label, error = %e, "Background job failed");
            }
            Err(_) => {
                metrics.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    job = label,
                    timeout_ms = job_timeout.as_millis() as u64,
                    "Background job timed out"
                );
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_core::StoreError;

    #[test]
    fn test_default_config() {
        let config = BackgroundConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.job_timeout, Duration::from_secs(1));
        assert_eq!(
            BackgroundConfig::default().with_queue_capacity(0).queue_capacity,
            1
        );
    }

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let (executor, handle) = BackgroundExecutor::start(BackgroundConfig::default());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = Arc::clone(&seen);
            assert!(executor.submit("push", async move {
                seen.lock().unwrap().push(i);
                Ok(())
            }));
        }
        executor.flush().await;
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
        let snapshot = handle.shutdown().await;
        assert_eq!(snapshot.jobs_completed, 10);
    }

    #[tokio::test]
    async fn test_failures_and_timeouts_are_counted() {
        let config = BackgroundConfig::default().with_job_timeout(Duration::from_millis(20));
        let (executor, handle) = BackgroundExecutor::start(config);
        executor.submit("fail", async {
            Err(StoreError::Unavailable {
                reason: "down".into(),
            })
        });
        executor.submit("slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        executor.flush().await;
        let snapshot = executor.metrics();
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_timed_out, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let config = BackgroundConfig::default().with_queue_capacity(1);
        let (executor, handle) = BackgroundExecutor::start(config);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        executor.submit("blocker", async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(())
        });
        started_rx.await.unwrap();

        assert!(executor.submit("queued", async { Ok(()) }));
        assert!(!executor.submit("dropped", async { Ok(()) }));
        assert_eq!(executor.metrics().jobs_dropped, 1);

        let _ = release_tx.send(());
        let snapshot = handle.shutdown().await;
        assert_eq!(snapshot.jobs_completed, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let (executor, handle) = BackgroundExecutor::start(BackgroundConfig::default());
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            executor.submit("count", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        handle.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(!executor.submit("late", async { Ok(()) }));
    }
}
