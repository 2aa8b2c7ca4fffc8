//! Bounded worker pool for job execution.

use pkgdeploy_config::MIN_WORKERS;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Runs submitted futures with at most `size` of them executing at once.
///
/// Submission never waits: tasks beyond capacity are spawned immediately and park
/// on the semaphore until a permit frees up.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(MIN_WORKERS);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tasks: JoinSet::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.reap();

        let permits = self.permits.clone();
        self.tasks.spawn(async move {
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });

        debug!(
            in_flight = self.in_flight(),
            queued = self.queued(),
            "Submitted task to worker pool"
        );
    }

    /// Tasks currently holding a worker slot.
    pub fn in_flight(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Tasks submitted but still waiting for a worker slot.
    pub fn queued(&self) -> usize {
        self.tasks.len().saturating_sub(self.in_flight())
    }

    /// Wait for every submitted task to finish.
    pub async fn shutdown(&mut self) {
        debug!(remaining = self.tasks.len(), "Draining worker pool");
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Worker task aborted");
            }
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "Worker task aborted");
            }
        }
    }
}
