//! Persistence and notification seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::id::{JobId, NodeId, PackageId, UserId};
use crate::job::{JobSnapshot, JobStatus};
use crate::package::PackageDetails;

/// Durable form of a deployment job, with the package snapshot resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    pub id: JobId,
    pub node_id: NodeId,
    pub user_id: UserId,
    pub creation_time: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub error_message: String,
    pub package: PackageDetails,
}

/// Durable storage for deployment jobs and their audit history.
#[async_trait]
pub trait DeploymentJobRepo: Send + Sync {
    /// Insert a newly created job.
    async fn create_record(&self, job: &StoredJob) -> Result<()>;

    /// Persist a non-terminal status change.
    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()>;

    /// Persist a new execution time of a job that is still `SCHEDULED`.
    async fn update_execution_time(&self, id: JobId, execution_time: DateTime<Utc>) -> Result<()>;

    /// Persist a terminal status together with its completion time and message.
    async fn update_completion(
        &self,
        id: JobId,
        status: JobStatus,
        completion_time: DateTime<Utc>,
        error_message: &str,
    ) -> Result<()>;

    /// Append one row to the deployment history log.
    async fn append_audit_log(&self, job: &StoredJob) -> Result<()>;

    async fn delete_record(&self, id: JobId) -> Result<()>;

    /// Load every job still present in live storage.
    async fn load_active_jobs(&self) -> Result<Vec<StoredJob>>;
}

/// Read access to the package catalog.
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn get_package(&self, id: PackageId) -> Result<Option<PackageDetails>>;
}

/// Push channel for job status changes.
pub trait JobNotifier: Send + Sync {
    /// Publish a snapshot taken right after a persisted status change. Must not block.
    fn publish(&self, snapshot: JobSnapshot);
}
