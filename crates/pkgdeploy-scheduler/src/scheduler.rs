//! The deployment scheduler service and its control surface.

use chrono::{DateTime, Utc};
use pkgdeploy_config::DeploymentConfig;
use pkgdeploy_core::{
    AccessRights, ControlError, DeploymentJob, DeploymentJobRepo, Error, JobHandle, JobId,
    JobNotifier, JobSnapshot, JobStatus, NodeDirectory, NodeId, PackageCatalog, PackageDetails,
    PackageId, Result, UserId,
};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::SchedulerContext;
use crate::dispatcher::DeploymentManager;

const RESTART_FAILURE_MESSAGE: &str = "Deployment interrupted by server restart";

/// Owns the job registry, the dispatcher task and the worker pool.
///
/// Call [`JobScheduler::start`] once to restore persisted jobs and begin
/// dispatching, and [`JobScheduler::stop`] to shut down. Stopping waits for
/// running deployments to finish.
pub struct JobScheduler {
    ctx: Arc<SchedulerContext>,
    catalog: Arc<dyn PackageCatalog>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(
        config: DeploymentConfig,
        repo: Arc<dyn DeploymentJobRepo>,
        catalog: Arc<dyn PackageCatalog>,
        notifier: Arc<dyn JobNotifier>,
        nodes: Arc<dyn NodeDirectory>,
    ) -> Self {
        Self {
            ctx: Arc::new(SchedulerContext::new(
                config.normalized(),
                repo,
                notifier,
                nodes,
            )),
            catalog,
            shutdown: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.ctx.config
    }

    /// Restore persisted jobs and spawn the dispatcher.
    pub async fn start(&self) -> Result<()> {
        if self.lock_dispatcher().is_some() {
            return Err(Error::Conflict("scheduler is already running".to_string()));
        }

        let restored = self.restore_jobs().await?;
        info!(restored, "Restored deployment jobs");

        let manager = DeploymentManager::new(self.ctx.clone(), self.shutdown.child_token());
        let handle = tokio::spawn(manager.run());

        let mut dispatcher = self.lock_dispatcher();
        if dispatcher.is_some() {
            handle.abort();
            return Err(Error::Conflict("scheduler is already running".to_string()));
        }
        *dispatcher = Some(handle);
        Ok(())
    }

    /// Stop dispatching and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.ctx.wake.notify_one();

        let handle = self.lock_dispatcher().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatcher task failed");
            }
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Persist a new job and hand it to the dispatcher.
    pub async fn register_job(
        &self,
        job: DeploymentJob,
    ) -> std::result::Result<JobSnapshot, ControlError> {
        let job = Arc::new(job);
        self.ctx.admit(job.clone()).await?;
        info!(
            job_id = %job.id(),
            node_id = %job.node_id(),
            package = %job.package().name,
            execution_time = %job.execution_time(),
            "Deployment job registered"
        );
        Ok(job.snapshot())
    }

    /// Create a job deploying a catalog package to a node, due at `execution_time`
    /// or immediately.
    pub async fn schedule_job(
        &self,
        package_id: PackageId,
        node_id: NodeId,
        user_id: UserId,
        execution_time: Option<DateTime<Utc>>,
    ) -> std::result::Result<JobSnapshot, ControlError> {
        let package = self.get_package_details(package_id).await?;

        if self.ctx.nodes.find_node(node_id).is_none() {
            return Err(ControlError::InvalidObjectId);
        }
        if !self
            .ctx
            .nodes
            .user_has_access(user_id, node_id, AccessRights::DEPLOY)
        {
            return Err(ControlError::AccessDenied);
        }

        let job = DeploymentJob::new(
            &package,
            node_id,
            user_id,
            execution_time.unwrap_or_else(Utc::now),
        );
        self.register_job(job).await
    }

    /// Cancel a job that has not been dispatched yet.
    pub async fn cancel_job(
        &self,
        job_id: JobId,
        requester: UserId,
    ) -> std::result::Result<(), ControlError> {
        let job = self
            .ctx
            .registry()
            .store
            .get(job_id)
            .ok_or(ControlError::InvalidJobId)?;

        if !self.may_control(&job, requester) {
            return Err(ControlError::AccessDenied);
        }

        self.ctx
            .set_completed_status(&job, JobStatus::Cancelled, "Cancelled by user")
            .await?;
        info!(%job_id, %requester, "Deployment job cancelled");
        Ok(())
    }

    /// Move a job that has not been dispatched yet to a new execution time.
    pub async fn reschedule_job(
        &self,
        job_id: JobId,
        requester: UserId,
        execution_time: DateTime<Utc>,
    ) -> std::result::Result<JobSnapshot, ControlError> {
        let job = self
            .ctx
            .registry()
            .store
            .get(job_id)
            .ok_or(ControlError::InvalidJobId)?;

        if !self.may_control(&job, requester) {
            return Err(ControlError::AccessDenied);
        }

        self.ctx
            .registry()
            .queue
            .reschedule(job.clone(), execution_time)
            .map_err(|_| ControlError::OutOfStateRequest)?;
        self.ctx.wake.notify_one();

        if let Err(e) = self
            .ctx
            .repo
            .update_execution_time(job_id, execution_time)
            .await
        {
            error!(%job_id, error = %e, "Failed to persist job execution time");
        }
        let snapshot = job.snapshot();
        self.ctx.notifier.publish(snapshot.clone());
        info!(%job_id, %requester, %execution_time, "Deployment job rescheduled");
        Ok(snapshot)
    }

    /// The system user, the job owner and users with CONTROL on the node may
    /// cancel or move a job.
    fn may_control(&self, job: &JobHandle, requester: UserId) -> bool {
        requester.is_system()
            || requester == job.user_id()
            || self
                .ctx
                .nodes
                .check_access(requester, job.node_id(), AccessRights::CONTROL)
    }

    /// Snapshots of every job on nodes the requester can read, oldest first.
    pub fn list_jobs(&self, requester: UserId) -> Vec<JobSnapshot> {
        let jobs = self.ctx.registry().store.select(|_| true);

        let mut snapshots: Vec<JobSnapshot> = jobs
            .iter()
            .filter(|job| {
                self.ctx
                    .nodes
                    .user_has_access(requester, job.node_id(), AccessRights::READ)
            })
            .map(|job| job.snapshot())
            .collect();
        snapshots.sort_by(|a, b| {
            a.creation_time
                .cmp(&b.creation_time)
                .then(a.id.cmp(&b.id))
        });
        snapshots
    }

    pub fn get_job(
        &self,
        job_id: JobId,
        requester: UserId,
    ) -> std::result::Result<JobSnapshot, ControlError> {
        let job = self
            .ctx
            .registry()
            .store
            .get(job_id)
            .ok_or(ControlError::InvalidJobId)?;

        if !self
            .ctx
            .nodes
            .user_has_access(requester, job.node_id(), AccessRights::READ)
        {
            return Err(ControlError::AccessDenied);
        }
        Ok(job.snapshot())
    }

    pub async fn get_package_details(
        &self,
        package_id: PackageId,
    ) -> std::result::Result<PackageDetails, ControlError> {
        self.catalog
            .get_package(package_id)
            .await?
            .ok_or(ControlError::InvalidPackageId)
    }

    /// Delete terminal jobs older than the configured retention period.
    pub async fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ctx.config.job_retention();
        self.sweep_expired_before(cutoff).await
    }

    /// Delete terminal jobs that finished before `cutoff`. Returns how many were removed.
    pub async fn sweep_expired_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired = self.ctx.registry().store.select(|job| job.is_expired(cutoff));

        let mut removed = 0;
        for job in expired {
            if let Err(e) = self.ctx.repo.delete_record(job.id()).await {
                warn!(job_id = %job.id(), error = %e, "Failed to delete expired deployment job");
                continue;
            }
            self.ctx.registry().store.remove(job.id());
            removed += 1;
        }

        if removed > 0 {
            info!(removed, %cutoff, "Swept expired deployment jobs");
        }
        removed
    }

    /// Run [`JobScheduler::sweep_expired`] on the configured interval until shutdown.
    pub fn spawn_retention_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let shutdown = self.shutdown.child_token();
        let period = self.ctx.config.retention_sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.sweep_expired().await;
                    }
                }
            }
        })
    }

    /// Load persisted jobs into the registry. Jobs caught mid-dispatch go back
    /// to the queue, jobs caught mid-execution are failed. Returns the number of
    /// jobs added.
    pub async fn restore_jobs(&self) -> Result<usize> {
        let stored = self.ctx.repo.load_active_jobs().await?;

        let mut restored = 0;
        for mut row in stored {
            let requeue = row.status == JobStatus::Pending;
            if requeue {
                row.status = JobStatus::Scheduled;
            }
            let job: JobHandle = Arc::new(DeploymentJob::from_stored(row));

            if !self.ctx.register(job.clone()) {
                warn!(job_id = %job.id(), "Deployment job already loaded, skipping");
                continue;
            }
            restored += 1;

            if requeue {
                info!(job_id = %job.id(), "Requeueing deployment job interrupted before start");
                if let Err(e) = self
                    .ctx
                    .repo
                    .update_status(job.id(), JobStatus::Scheduled)
                    .await
                {
                    error!(job_id = %job.id(), error = %e, "Failed to persist job status");
                }
            } else if job.status().is_in_progress() {
                warn!(job_id = %job.id(), status = %job.status(), "Failing deployment job interrupted by restart");
                self.ctx
                    .mark_as_failed(&job, RESTART_FAILURE_MESSAGE, false)
                    .await?;
            }
        }
        Ok(restored)
    }

    fn lock_dispatcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.dispatcher.lock().unwrap_or_else(|e| e.into_inner())
    }
}
