//! Per-job deployment protocol, run on a worker.

use pkgdeploy_config::{AGENT_RECONNECT_STEP, expand_command};
use pkgdeploy_core::poll::poll_until;
use pkgdeploy_core::{
    AccessRights, AgentConnection, DeploymentAction, DeploymentFailure, JobHandle, JobStatus,
    ManagedNode,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::SchedulerContext;

/// Agent parameter holding the running agent version.
pub const AGENT_VERSION_PARAMETER: &str = "Agent.Version";

type DeployResult<T> = std::result::Result<T, DeploymentFailure>;

enum InstallOutcome {
    Installed,
    /// The agent accepted its self-upgrade and is about to restart.
    UpgradeStarted,
}

pub(crate) struct JobExecutor {
    ctx: Arc<SchedulerContext>,
    job: JobHandle,
}

impl JobExecutor {
    pub fn new(ctx: Arc<SchedulerContext>, job: JobHandle) -> Self {
        Self { ctx, job }
    }

    /// Drive a `PENDING` job to a terminal status. Every failure ends here as
    /// a status update.
    pub async fn execute(self) {
        let job = &self.job;
        if let Err(e) = self.ctx.set_status(job, JobStatus::Initializing).await {
            warn!(job_id = %job.id(), error = %e, "Cannot start deployment job");
            return;
        }

        match self.deploy().await {
            Ok(()) => {
                info!(job_id = %job.id(), node_id = %job.node_id(), "Deployment completed");
                if let Err(e) = self
                    .ctx
                    .set_completed_status(job, JobStatus::Completed, "")
                    .await
                {
                    warn!(job_id = %job.id(), error = %e, "Cannot complete deployment job");
                }
            }
            Err(failure) => {
                warn!(
                    job_id = %job.id(),
                    node_id = %job.node_id(),
                    retry = failure.allows_retry(),
                    error = %failure,
                    "Deployment failed"
                );
                if let Err(e) = self
                    .ctx
                    .mark_as_failed(job, &failure.to_string(), failure.allows_retry())
                    .await
                {
                    warn!(job_id = %job.id(), error = %e, "Cannot fail deployment job");
                }
            }
        }
    }

    async fn deploy(&self) -> DeployResult<()> {
        let job = &self.job;
        let node = self.ctx.nodes.find_node(job.node_id()).ok_or_else(|| {
            DeploymentFailure::Validation(format!("Node {} does not exist", job.node_id()))
        })?;

        if !self
            .ctx
            .nodes
            .user_has_access(job.user_id(), node.id(), AccessRights::DEPLOY)
        {
            return Err(DeploymentFailure::Validation(format!(
                "User {} has insufficient rights on node {}",
                job.user_id(),
                node.name()
            )));
        }

        if job.action().is_agent_upgrade() && node.is_local_management_node() {
            return Err(DeploymentFailure::Validation(
                "Agent upgrade on the management server node is not allowed".to_string(),
            ));
        }

        let conn = node.connect_to_agent().await.map_err(|e| {
            DeploymentFailure::Transient(format!("Cannot connect to agent on {}: {}", node.name(), e))
        })?;
        let outcome = self.transfer_and_install(node.as_ref(), conn.as_ref()).await;
        conn.disconnect().await;

        if let InstallOutcome::UpgradeStarted = outcome? {
            self.verify_agent_upgrade(node.as_ref()).await?;
        }

        node.request_configuration_poll();
        Ok(())
    }

    async fn transfer_and_install(
        &self,
        node: &dyn ManagedNode,
        conn: &dyn AgentConnection,
    ) -> DeployResult<InstallOutcome> {
        let package = self.job.package();
        let platform = node.platform_name();
        if !package.is_compatible_with(&platform, node.supports_source_packages()) {
            return Err(DeploymentFailure::Compatibility(if package.is_source() {
                format!("Node {} does not support source packages", node.name())
            } else {
                format!(
                    "Package platform {} does not match node platform {}",
                    package.platform, platform
                )
            }));
        }

        self.step(JobStatus::FileTransferRunning).await?;
        let local_path = self.ctx.config.package_directory.join(&package.file);
        debug!(job_id = %self.job.id(), path = %local_path.display(), "Uploading package file");
        conn.upload_file(&local_path, &package.file)
            .await
            .map_err(|e| DeploymentFailure::Transient(format!("File transfer failed: {}", e)))?;

        self.step(JobStatus::InstallationRunning).await?;
        match self.job.action() {
            DeploymentAction::AgentUpgrade { .. } => {
                conn.start_upgrade(&package.file).await.map_err(|e| {
                    DeploymentFailure::AgentUpgradeVerification(format!(
                        "Cannot start agent upgrade: {}",
                        e
                    ))
                })?;
                Ok(InstallOutcome::UpgradeStarted)
            }
            DeploymentAction::GenericInstall {
                package_type,
                command,
            } => {
                let command = expand_command(command, &node.context());
                conn.install_package(
                    &package.file,
                    package_type,
                    &command,
                    self.ctx.config.install_timeout,
                )
                .await
                .map_err(|e| {
                    DeploymentFailure::Installation(format!("Package installation failed: {}", e))
                })?;
                Ok(InstallOutcome::Installed)
            }
        }
    }

    async fn verify_agent_upgrade(&self, node: &dyn ManagedNode) -> DeployResult<()> {
        let DeploymentAction::AgentUpgrade { target_version } = self.job.action() else {
            return Ok(());
        };

        self.step(JobStatus::WaitingForAgent).await?;
        let wait = self.ctx.config.agent_reconnect_wait;
        let conn = poll_until(AGENT_RECONNECT_STEP, wait, || async move {
            node.connect_to_agent().await.ok()
        })
        .await
        .ok_or_else(|| {
            DeploymentFailure::AgentUpgradeVerification(format!(
                "Agent did not reconnect within {} seconds after upgrade",
                wait.as_secs()
            ))
        })?;

        let version = conn.get_parameter(AGENT_VERSION_PARAMETER).await;
        conn.disconnect().await;
        let version = version.map_err(|e| {
            DeploymentFailure::AgentUpgradeVerification(format!(
                "Cannot read agent version after upgrade: {}",
                e
            ))
        })?;

        if version != *target_version {
            return Err(DeploymentFailure::AgentUpgradeVerification(format!(
                "Agent version after upgrade is {}, expected {}",
                version, target_version
            )));
        }
        Ok(())
    }

    async fn step(&self, status: JobStatus) -> DeployResult<()> {
        self.ctx.set_status(&self.job, status).await.map_err(|e| {
            DeploymentFailure::Validation(format!("Job state changed unexpectedly: {}", e))
        })
    }
}
