//! Deployment job repository - live job rows and the deployment history log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pkgdeploy_core::{
    DeploymentJobRepo, JobId, JobStatus, NodeId, PackageDetails, PackageId, StoredJob, UserId,
};
use sqlx::PgPool;
use tracing::warn;

use crate::{DbError, DbResult};

/// A live job row joined with its package. Package columns are null when the
/// package has been removed from the catalog.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: uuid::Uuid,
    pub pkg_id: i64,
    pub node_id: i64,
    pub user_id: i64,
    pub creation_time: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub status: i16,
    pub failure_reason: String,
    pub pkg_type: Option<String>,
    pub pkg_name: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub pkg_file: Option<String>,
    pub command: Option<String>,
    pub description: Option<String>,
}

pub(crate) fn to_u32(value: i64, column: &str) -> DbResult<u32> {
    u32::try_from(value).map_err(|_| DbError::InvalidRow(format!("{} out of range: {}", column, value)))
}

impl TryFrom<JobRow> for StoredJob {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let status = JobStatus::from_code(row.status)
            .ok_or_else(|| DbError::InvalidRow(format!("unknown status code {}", row.status)))?;

        let (Some(package_type), Some(name), Some(version), Some(platform), Some(file)) = (
            row.pkg_type,
            row.pkg_name,
            row.version,
            row.platform,
            row.pkg_file,
        ) else {
            return Err(DbError::NotFound(format!(
                "package {} of job {}",
                row.pkg_id, row.id
            )));
        };

        Ok(StoredJob {
            id: JobId::from_uuid(row.id),
            node_id: NodeId(to_u32(row.node_id, "node_id")?),
            user_id: UserId(to_u32(row.user_id, "user_id")?),
            creation_time: row.creation_time,
            execution_time: row.execution_time,
            completion_time: row.completion_time,
            status,
            error_message: row.failure_reason,
            package: PackageDetails {
                id: PackageId(to_u32(row.pkg_id, "pkg_id")?),
                package_type,
                name,
                version,
                platform,
                file,
                command: row.command.unwrap_or_default(),
                description: row.description.unwrap_or_default(),
            },
        })
    }
}

const SELECT_JOBS: &str = r#"
    SELECT j.id, j.pkg_id, j.node_id, j.user_id, j.creation_time, j.execution_time,
           j.completion_time, j.status, j.failure_reason,
           p.pkg_type, p.pkg_name, p.version, p.platform, p.pkg_file, p.command, p.description
    FROM package_deployment_jobs j
    LEFT JOIN packages p ON p.pkg_id = j.pkg_id
"#;

/// PostgreSQL implementation of DeploymentJobRepo.
pub struct PgDeploymentJobRepo {
    pool: PgPool,
}

impl PgDeploymentJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All live job rows, newest first.
    pub async fn list_rows(&self) -> DbResult<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "{} ORDER BY j.creation_time DESC",
            SELECT_JOBS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete terminal job rows that completed before `cutoff`.
    /// Returns the number of deleted rows.
    pub async fn purge_expired(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let terminal: Vec<i16> = [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled]
            .iter()
            .map(|s| s.code())
            .collect();

        let result = sqlx::query(
            r#"
            DELETE FROM package_deployment_jobs
            WHERE status = ANY($1) AND COALESCE(completion_time, creation_time) < $2
            "#,
        )
        .bind(&terminal[..])
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DeploymentJobRepo for PgDeploymentJobRepo {
    async fn create_record(&self, job: &StoredJob) -> pkgdeploy_core::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO package_deployment_jobs
                (id, pkg_id, node_id, user_id, creation_time, execution_time,
                 completion_time, status, failure_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(i64::from(job.package.id.0))
        .bind(i64::from(job.node_id.0))
        .bind(i64::from(job.user_id.0))
        .bind(job.creation_time)
        .bind(job.execution_time)
        .bind(job.completion_time)
        .bind(job.status.code())
        .bind(&job.error_message)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(())
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> pkgdeploy_core::Result<()> {
        sqlx::query("UPDATE package_deployment_jobs SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.code())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn update_execution_time(
        &self,
        id: JobId,
        execution_time: DateTime<Utc>,
    ) -> pkgdeploy_core::Result<()> {
        sqlx::query("UPDATE package_deployment_jobs SET execution_time = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(execution_time)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn update_completion(
        &self,
        id: JobId,
        status: JobStatus,
        completion_time: DateTime<Utc>,
        error_message: &str,
    ) -> pkgdeploy_core::Result<()> {
        sqlx::query(
            r#"
            UPDATE package_deployment_jobs
            SET status = $2, completion_time = $3, failure_reason = $4
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.code())
        .bind(completion_time)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(())
    }

    async fn append_audit_log(&self, job: &StoredJob) -> pkgdeploy_core::Result<()> {
        let pkg = &job.package;
        sqlx::query(
            r#"
            INSERT INTO package_deployment_log
                (job_id, pkg_id, node_id, user_id, creation_time, execution_time,
                 completion_time, status, failure_reason,
                 pkg_type, pkg_name, version, platform, pkg_file, command, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(i64::from(pkg.id.0))
        .bind(i64::from(job.node_id.0))
        .bind(i64::from(job.user_id.0))
        .bind(job.creation_time)
        .bind(job.execution_time)
        .bind(job.completion_time)
        .bind(job.status.code())
        .bind(&job.error_message)
        .bind(&pkg.package_type)
        .bind(&pkg.name)
        .bind(&pkg.version)
        .bind(&pkg.platform)
        .bind(&pkg.file)
        .bind(&pkg.command)
        .bind(&pkg.description)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(())
    }

    async fn delete_record(&self, id: JobId) -> pkgdeploy_core::Result<()> {
        sqlx::query("DELETE FROM package_deployment_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn load_active_jobs(&self) -> pkgdeploy_core::Result<Vec<StoredJob>> {
        let rows = self.list_rows().await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match StoredJob::try_from(row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(job_id = %id, error = %e, "Skipping unreadable deployment job"),
            }
        }
        Ok(jobs)
    }
}
