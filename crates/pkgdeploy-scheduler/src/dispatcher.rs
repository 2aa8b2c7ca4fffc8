//! Dispatcher loop: waits for due jobs and hands them to the worker pool.

use chrono::Utc;
use pkgdeploy_core::{JobHandle, JobStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::SchedulerContext;
use crate::executor::JobExecutor;
use crate::pool::WorkerPool;

/// Longest the dispatcher sleeps without a pulse.
const IDLE_SLEEP: Duration = Duration::from_secs(600);

pub(crate) struct DeploymentManager {
    ctx: Arc<SchedulerContext>,
    pool: WorkerPool,
    shutdown: CancellationToken,
}

impl DeploymentManager {
    pub fn new(ctx: Arc<SchedulerContext>, shutdown: CancellationToken) -> Self {
        let pool = WorkerPool::new(ctx.config.max_workers);
        Self {
            ctx,
            pool,
            shutdown,
        }
    }

    /// Run until shutdown, then wait for in-flight jobs to finish.
    pub async fn run(mut self) {
        info!(max_workers = self.pool.size(), "Deployment manager started");

        while !self.shutdown.is_cancelled() {
            let sleep_time = self.dispatch_due_jobs().await;

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.ctx.wake.notified() => {}
                _ = tokio::time::sleep(sleep_time) => {}
            }
        }

        info!(
            in_flight = self.pool.in_flight(),
            queued = self.pool.queued(),
            "Deployment manager stopping, waiting for running jobs"
        );
        self.pool.shutdown().await;
        info!("Deployment manager stopped");
    }

    /// Dispatch every job whose execution time has come. Returns how long to
    /// sleep until the next one is due.
    async fn dispatch_due_jobs(&mut self) -> Duration {
        loop {
            if self.shutdown.is_cancelled() {
                return Duration::ZERO;
            }

            let next = {
                let mut registry = self.ctx.registry();
                match registry.queue.pop_due(Utc::now()) {
                    // Claimed under the registry lock so a reschedule cannot move the job
                    // between the pop and the claim.
                    Some(job) => match job.transition(JobStatus::Pending) {
                        Ok(_) => Ok(Some(job)),
                        Err(e) => {
                            // Cancelled jobs keep their queue entry.
                            debug!(job_id = %job.id(), status = %job.status(), error = %e, "Dropping stale queue entry");
                            Ok(None)
                        }
                    },
                    None => Err(registry.queue.next_execution_time()),
                }
            };

            match next {
                Ok(Some(job)) => self.dispatch(job).await,
                Ok(None) => {}
                Err(Some(at)) => {
                    let delta = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    return delta.min(IDLE_SLEEP);
                }
                Err(None) => return IDLE_SLEEP,
            }
        }
    }

    async fn dispatch(&mut self, job: JobHandle) {
        self.ctx.record_status(&job, JobStatus::Pending).await;

        info!(
            job_id = %job.id(),
            node_id = %job.node_id(),
            package = %job.package().name,
            "Dispatching deployment job"
        );
        let executor = JobExecutor::new(self.ctx.clone(), job);
        self.pool.submit(executor.execute());
    }
}
