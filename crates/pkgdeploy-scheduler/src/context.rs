//! State shared by the scheduler service, the dispatcher and job executors.

use chrono::{Duration, Utc};
use pkgdeploy_config::DeploymentConfig;
use pkgdeploy_core::{
    DeploymentJobRepo, JobHandle, JobNotifier, JobStatus, NodeDirectory, Result,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{error, info};

use crate::registry::Registry;

/// Delay before a replacement job runs after a transient failure.
pub const RETRY_DELAY_SECS: i64 = 600;

pub(crate) struct SchedulerContext {
    pub config: DeploymentConfig,
    registry: Mutex<Registry>,
    /// Pulsed whenever the queue gains a job or shutdown is requested.
    pub wake: Notify,
    pub repo: Arc<dyn DeploymentJobRepo>,
    pub notifier: Arc<dyn JobNotifier>,
    pub nodes: Arc<dyn NodeDirectory>,
}

impl SchedulerContext {
    pub fn new(
        config: DeploymentConfig,
        repo: Arc<dyn DeploymentJobRepo>,
        notifier: Arc<dyn JobNotifier>,
        nodes: Arc<dyn NodeDirectory>,
    ) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            wake: Notify::new(),
            repo,
            notifier,
            nodes,
        }
    }

    /// Lock the registry. Never hold the guard across an `.await`.
    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a job to the store and, if it is waiting to run, to the queue.
    /// Returns false when a job with the same id is already registered.
    pub fn register(&self, job: JobHandle) -> bool {
        {
            let mut registry = self.registry();
            if !registry.store.put(job.clone()) {
                return false;
            }
            if job.status() == JobStatus::Scheduled {
                registry.queue.push(job);
            }
        }
        self.wake.notify_one();
        true
    }

    /// Persist a freshly created job, register it and announce it.
    pub async fn admit(&self, job: JobHandle) -> Result<()> {
        self.repo.create_record(&job.to_stored()).await?;
        self.register(job.clone());
        self.notifier.publish(job.snapshot());
        Ok(())
    }

    /// Non-terminal status change: update, persist, notify.
    pub async fn set_status(&self, job: &JobHandle, status: JobStatus) -> Result<()> {
        job.transition(status)?;
        self.record_status(job, status).await;
        Ok(())
    }

    /// Persist and announce a status the job has already moved to.
    pub async fn record_status(&self, job: &JobHandle, status: JobStatus) {
        if let Err(e) = self.repo.update_status(job.id(), status).await {
            error!(job_id = %job.id(), %status, error = %e, "Failed to persist job status");
        }
        self.notifier.publish(job.snapshot());
    }

    /// Terminal status change: update, persist, append to the history log, notify.
    pub async fn set_completed_status(
        &self,
        job: &JobHandle,
        status: JobStatus,
        message: &str,
    ) -> Result<()> {
        let completion_time = Utc::now();
        job.complete(status, message, completion_time)?;

        if let Err(e) = self
            .repo
            .update_completion(job.id(), status, completion_time, message)
            .await
        {
            error!(job_id = %job.id(), %status, error = %e, "Failed to persist job completion");
        }
        if let Err(e) = self.repo.append_audit_log(&job.to_stored()).await {
            error!(job_id = %job.id(), error = %e, "Failed to write deployment log record");
        }
        self.notifier.publish(job.snapshot());
        Ok(())
    }

    /// Fail the job. With `allow_retry`, a replacement job is scheduled
    /// [`RETRY_DELAY_SECS`] after the failure.
    pub async fn mark_as_failed(
        &self,
        job: &JobHandle,
        message: &str,
        allow_retry: bool,
    ) -> Result<()> {
        self.set_completed_status(job, JobStatus::Failed, message)
            .await?;

        if !allow_retry {
            return Ok(());
        }

        let failed_at = job.completion_time().unwrap_or_else(Utc::now);
        let retry = Arc::new(job.retry_at(failed_at + Duration::seconds(RETRY_DELAY_SECS)));
        info!(
            job_id = %job.id(),
            retry_job_id = %retry.id(),
            execution_time = %retry.execution_time(),
            "Scheduling retry of failed deployment"
        );
        if let Err(e) = self.admit(retry).await {
            error!(job_id = %job.id(), error = %e, "Failed to schedule retry job");
        }
        Ok(())
    }
}
