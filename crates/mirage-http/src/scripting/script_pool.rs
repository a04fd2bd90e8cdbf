use crate::config::ScriptPoolSettings;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Configuration for the script thread pool
#[derive(Clone, Debug)]
pub struct ScriptPoolConfig {
    /// Number of worker threads
    pub workers: usize,
    /// Maximum number of jobs waiting for a worker
    pub queue_size: usize,
    /// Timeout in milliseconds for one job, queueing included
    pub timeout_ms: u64,
}

impl Default for ScriptPoolConfig {
    fn default() -> Self {
        let workers = (num_cpus::get() / 2).clamp(2, 16); // Min 2, max 16

        Self {
            workers,
            queue_size: 1000,
            timeout_ms: 5000,
        }
    }
}

impl From<&ScriptPoolSettings> for ScriptPoolConfig {
    fn from(settings: &ScriptPoolSettings) -> Self {
        let defaults = Self::default();
        Self {
            workers: if settings.workers == 0 {
                defaults.workers
            } else {
                settings.workers
            },
            queue_size: settings.queue_size.max(1),
            timeout_ms: settings.timeout_ms,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Script pool queue is full")]
    Exhausted,
    #[error("Script execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("Script pool is shut down")]
    ShutDown,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Script worker thread
struct ScriptWorker {
    worker_id: usize,
    thread_handle: Option<JoinHandle<()>>,
}

impl ScriptWorker {
    fn spawn(
        worker_id: usize,
        work_rx: Receiver<Job>,
        shutdown_rx: Receiver<()>,
    ) -> std::io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("script-worker-{worker_id}"))
            .spawn(move || {
                debug!("Script worker {} started", worker_id);

                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        debug!("Script worker {} received shutdown signal", worker_id);
                        break;
                    }

                    // Wait for work with timeout to allow shutdown checks
                    match work_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(job) => {
                            let start = Instant::now();
                            job();
                            debug!(
                                "Job completed in {:?} on worker {}",
                                start.elapsed(),
                                worker_id
                            );
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Script worker {} channel disconnected", worker_id);
                            break;
                        }
                    }
                }

                debug!("Script worker {} shutting down", worker_id);
            })?;

        Ok(Self {
            worker_id,
            thread_handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!("Waiting for script worker {} to finish", self.worker_id);
            let _ = handle.join();
        }
    }
}

/// Bounded pool of worker threads for blocking work (script evaluation).
///
/// Jobs are rejected with [`PoolError::Exhausted`] rather than queued
/// without bound. Callers await results on the async side without holding
/// a worker.
pub struct ScriptPool {
    workers: Vec<ScriptWorker>,
    work_tx: Sender<Job>,
    shutdown_tx: Sender<()>,
    config: ScriptPoolConfig,
    queue_depth: Arc<AtomicUsize>,
}

impl ScriptPool {
    pub fn new(config: ScriptPoolConfig) -> std::io::Result<Self> {
        info!(
            "Creating script pool with {} workers, queue size {}",
            config.workers, config.queue_size
        );

        let (work_tx, work_rx) = bounded(config.queue_size);
        let (shutdown_tx, shutdown_rx) = bounded(config.workers);

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            workers.push(ScriptWorker::spawn(
                worker_id,
                work_rx.clone(),
                shutdown_rx.clone(),
            )?);
        }

        Ok(Self {
            workers,
            work_tx,
            shutdown_tx,
            config,
            queue_depth: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Run `job` on a worker and await its result.
    pub async fn execute<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let queue_depth = Arc::clone(&self.queue_depth);

        queue_depth.fetch_add(1, Ordering::Relaxed);
        let task_depth = Arc::clone(&queue_depth);
        let task: Job = Box::new(move || {
            task_depth.fetch_sub(1, Ordering::Relaxed);
            // Receiver may have timed out already
            let _ = result_tx.send(job());
        });

        self.work_tx.try_send(task).map_err(|e| {
            queue_depth.fetch_sub(1, Ordering::Relaxed);
            match e {
                TrySendError::Full(_) => {
                    warn!("Script pool queue is full");
                    PoolError::Exhausted
                }
                TrySendError::Disconnected(_) => {
                    error!("Script pool is shut down");
                    PoolError::ShutDown
                }
            }
        })?;

        tokio::time::timeout(timeout, result_rx)
            .await
            .map_err(|_| PoolError::Timeout(timeout))?
            .map_err(|_| PoolError::ShutDown)
    }

    /// Jobs accepted but not yet picked up by a worker
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Gracefully shutdown the pool
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        info!(
            "Shutting down script pool with {} workers",
            self.workers.len()
        );

        for _ in 0..self.workers.len() {
            let _ = self.shutdown_tx.send(());
        }
        for worker in &mut self.workers {
            worker.shutdown();
        }
        self.workers.clear();

        info!("Script pool shutdown complete");
    }
}

impl Drop for ScriptPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(workers: usize, queue_size: usize, timeout_ms: u64) -> ScriptPoolConfig {
        ScriptPoolConfig {
            workers,
            queue_size,
            timeout_ms,
        }
    }

    #[test]
    fn test_pool_creation() {
        let pool = ScriptPool::new(config(2, 10, 5000)).unwrap();
        assert_eq!(pool.worker_count(), 2);
        assert_eq!(pool.queue_depth(), 0);
    }

    #[test]
    fn test_pool_shutdown() {
        let mut pool = ScriptPool::new(config(2, 10, 5000)).unwrap();
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
        // Second shutdown is a no-op
        pool.shutdown();
    }

    #[test]
    fn test_default_config() {
        let config = ScriptPoolConfig::default();
        assert!(config.workers >= 2);
        assert!(config.workers <= 16);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn test_config_from_settings_auto_detects_workers() {
        let settings = ScriptPoolSettings {
            workers: 0,
            queue_size: 0,
            timeout_ms: 250,
        };
        let config = ScriptPoolConfig::from(&settings);
        assert!(config.workers >= 2);
        assert_eq!(config.queue_size, 1);
        assert_eq!(config.timeout_ms, 250);
    }

    #[tokio::test]
    async fn test_execute_returns_result_from_worker_thread() {
        let pool = ScriptPool::new(config(2, 10, 5000)).unwrap();
        let name = pool
            .execute(|| thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert!(name.unwrap().starts_with("script-worker-"));
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let pool = ScriptPool::new(config(1, 10, 20)).unwrap();
        let result = pool
            .execute(|| thread::sleep(Duration::from_millis(200)))
            .await;
        assert_eq!(result, Err(PoolError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let pool = Arc::new(ScriptPool::new(config(1, 1, 5000)).unwrap());
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);

        // Occupy the only worker
        let busy = {
            let pool = Arc::clone(&pool);
            let release_rx = release_rx.clone();
            tokio::spawn(async move { pool.execute(move || release_rx.recv().ok()).await })
        };
        while pool.queue_depth() > 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fill the single queue slot
        let queued = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.execute(|| 1).await })
        };
        while pool.queue_depth() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.execute(|| 2).await, Err(PoolError::Exhausted));

        release_tx.send(()).unwrap();
        assert!(busy.await.unwrap().is_ok());
        assert_eq!(queued.await.unwrap(), Ok(1));
    }
}
