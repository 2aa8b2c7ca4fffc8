//! Deployment job record and its status state machine.
//!
//! A [`DeploymentJob`] is shared between the job store, the scheduled queue and the
//! worker executing it through a [`JobHandle`]. Identity and the package snapshot are
//! immutable; status, timing and the error message live behind the record's own lock
//! so that competing transitions (dispatch vs. cancel) are decided atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::id::{JobId, NodeId, PackageId, UserId};
use crate::package::{DeploymentAction, PackageDetails};
use crate::repo::StoredJob;

/// Shared handle to a job record.
pub type JobHandle = Arc<DeploymentJob>;

/// Status of a deployment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for its execution time.
    Scheduled,
    /// Claimed by the dispatcher and handed to the worker pool.
    Pending,
    Initializing,
    FileTransferRunning,
    InstallationRunning,
    /// Agent self-upgrade started; waiting for the agent to reconnect.
    WaitingForAgent,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Scheduled,
        JobStatus::Pending,
        JobStatus::Initializing,
        JobStatus::FileTransferRunning,
        JobStatus::InstallationRunning,
        JobStatus::WaitingForAgent,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Numeric status code used in storage and notifications.
    pub fn code(&self) -> i16 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::FileTransferRunning => 1,
            JobStatus::InstallationRunning => 2,
            JobStatus::Completed => 3,
            JobStatus::Failed => 4,
            JobStatus::Initializing => 5,
            JobStatus::WaitingForAgent => 6,
            JobStatus::Cancelled => 7,
            JobStatus::Scheduled => 8,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a job executing on a worker may be in this status.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            JobStatus::Initializing
                | JobStatus::FileTransferRunning
                | JobStatus::InstallationRunning
                | JobStatus::WaitingForAgent
        )
    }

    /// Transition table. Statuses only move forward; `FAILED` is reachable from every
    /// non-terminal status and `CANCELLED` only from `SCHEDULED`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Scheduled, Pending | Cancelled) => true,
            (Pending, Initializing) => true,
            (Initializing, FileTransferRunning) => true,
            (FileTransferRunning, InstallationRunning) => true,
            (InstallationRunning, WaitingForAgent | Completed) => true,
            (WaitingForAgent, Completed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Pending => "PENDING",
            JobStatus::Initializing => "INITIALIZING",
            JobStatus::FileTransferRunning => "FILE_TRANSFER_RUNNING",
            JobStatus::InstallationRunning => "INSTALLATION_RUNNING",
            JobStatus::WaitingForAgent => "WAITING_FOR_AGENT",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    execution_time: DateTime<Utc>,
    completion_time: Option<DateTime<Utc>>,
    error_message: String,
}

/// One scheduled attempt to deploy one package to one node for one user.
#[derive(Debug)]
pub struct DeploymentJob {
    id: JobId,
    node_id: NodeId,
    user_id: UserId,
    creation_time: DateTime<Utc>,
    package: PackageDetails,
    action: DeploymentAction,
    state: Mutex<JobState>,
}

impl DeploymentJob {
    /// Create a new `SCHEDULED` job capturing a snapshot of the package details.
    pub fn new(
        package: &PackageDetails,
        node_id: NodeId,
        user_id: UserId,
        execution_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            node_id,
            user_id,
            creation_time: Utc::now(),
            package: package.clone(),
            action: DeploymentAction::for_package(package),
            state: Mutex::new(JobState {
                status: JobStatus::Scheduled,
                execution_time,
                completion_time: None,
                error_message: String::new(),
            }),
        }
    }

    /// Rebuild a job from its stored row.
    pub fn from_stored(stored: StoredJob) -> Self {
        let action = DeploymentAction::for_package(&stored.package);
        Self {
            id: stored.id,
            node_id: stored.node_id,
            user_id: stored.user_id,
            creation_time: stored.creation_time,
            package: stored.package,
            action,
            state: Mutex::new(JobState {
                status: stored.status,
                execution_time: stored.execution_time,
                completion_time: stored.completion_time,
                error_message: stored.error_message,
            }),
        }
    }

    /// Create the replacement for a failed attempt: same target and package,
    /// fresh id, `SCHEDULED` at the given time.
    pub fn retry_at(&self, execution_time: DateTime<Utc>) -> Self {
        Self::new(&self.package, self.node_id, self.user_id, execution_time)
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn package_id(&self) -> PackageId {
        self.package.id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn package(&self) -> &PackageDetails {
        &self.package
    }

    pub fn action(&self) -> &DeploymentAction {
        &self.action
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    pub fn execution_time(&self) -> DateTime<Utc> {
        self.state().execution_time
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.state().completion_time
    }

    pub fn error_message(&self) -> String {
        self.state().error_message.clone()
    }

    /// Change the execution time. Only allowed while the job is still `SCHEDULED`.
    ///
    /// A queued job must be moved through the scheduler's queue as well; queue
    /// entries that no longer match the job's execution time are discarded.
    pub fn set_execution_time(&self, execution_time: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        if state.status != JobStatus::Scheduled {
            return Err(Error::Conflict(format!(
                "execution time of job {} is fixed once it is {}",
                self.id, state.status
            )));
        }
        state.execution_time = execution_time;
        Ok(())
    }

    /// Move to a non-terminal status. Returns the previous status.
    pub fn transition(&self, next: JobStatus) -> Result<JobStatus> {
        if next.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is terminal, use complete()",
                next
            )));
        }
        let mut state = self.state();
        let previous = state.status;
        if !previous.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: previous,
                to: next,
            });
        }
        state.status = next;
        Ok(previous)
    }

    /// Move to a terminal status, stamping the completion time and message.
    pub fn complete(
        &self,
        next: JobStatus,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<JobStatus> {
        if !next.is_terminal() {
            return Err(Error::InvalidInput(format!("{} is not terminal", next)));
        }
        let mut state = self.state();
        let previous = state.status;
        if !previous.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: previous,
                to: next,
            });
        }
        state.status = next;
        state.completion_time = Some(at);
        state.error_message = message.into();
        Ok(previous)
    }

    /// Whether this job is terminal and finished before `cutoff`.
    pub fn is_expired(&self, cutoff: DateTime<Utc>) -> bool {
        let state = self.state();
        state.status.is_terminal() && state.completion_time.unwrap_or(self.creation_time) < cutoff
    }

    /// Point-in-time copy of the whole record.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state().clone();
        JobSnapshot {
            id: self.id,
            node_id: self.node_id,
            user_id: self.user_id,
            status: state.status,
            status_code: state.status.code(),
            creation_time: self.creation_time,
            execution_time: state.execution_time,
            completion_time: state.completion_time,
            package_id: self.package.id,
            package_type: self.package.package_type.clone(),
            package_name: self.package.name.clone(),
            platform: self.package.platform.clone(),
            version: self.package.version.clone(),
            package_file: self.package.file.clone(),
            command: self.package.command.clone(),
            description: self.package.description.clone(),
            error_message: state.error_message,
        }
    }

    /// Stored representation of the record.
    pub fn to_stored(&self) -> StoredJob {
        let state = self.state().clone();
        StoredJob {
            id: self.id,
            node_id: self.node_id,
            user_id: self.user_id,
            creation_time: self.creation_time,
            execution_time: state.execution_time,
            completion_time: state.completion_time,
            status: state.status,
            error_message: state.error_message,
            package: self.package.clone(),
        }
    }
}

/// Serializable copy of a job, as pushed to observers and returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub node_id: NodeId,
    pub user_id: UserId,
    pub status: JobStatus,
    pub status_code: i16,
    pub creation_time: DateTime<Utc>,
    pub execution_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub package_id: PackageId,
    pub package_type: String,
    pub package_name: String,
    pub platform: String,
    pub version: String,
    pub package_file: String,
    pub command: String,
    pub description: String,
    pub error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn package() -> PackageDetails {
        PackageDetails {
            id: PackageId(3),
            package_type: "deb".to_string(),
            name: "collector".to_string(),
            version: "2.0".to_string(),
            platform: "Linux-x86_64".to_string(),
            file: "collector_2.0.deb".to_string(),
            command: "dpkg -i collector_2.0.deb".to_string(),
            description: "Collector".to_string(),
        }
    }

    fn job() -> DeploymentJob {
        DeploymentJob::new(&package(), NodeId(10), UserId(1), Utc::now())
    }

    #[test]
    fn test_status_codes_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(JobStatus::from_code(99), None);
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        for from in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_cancel_only_from_scheduled() {
        for from in JobStatus::ALL {
            assert_eq!(
                from.can_transition_to(JobStatus::Cancelled),
                from == JobStatus::Scheduled
            );
        }
    }

    #[test]
    fn test_full_agent_upgrade_sequence_is_valid() {
        let job = job();
        for next in [
            JobStatus::Pending,
            JobStatus::Initializing,
            JobStatus::FileTransferRunning,
            JobStatus::InstallationRunning,
            JobStatus::WaitingForAgent,
        ] {
            job.transition(next).unwrap();
        }
        job.complete(JobStatus::Completed, "", Utc::now()).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.completion_time().is_some());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let job = job();
        job.transition(JobStatus::Pending).unwrap();
        let err = job.transition(JobStatus::Pending).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(job.complete(JobStatus::Cancelled, "", Utc::now()).is_err());
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn test_execution_time_fixed_after_dispatch() {
        let job = job();
        let later = Utc::now() + Duration::hours(1);
        job.set_execution_time(later).unwrap();
        assert_eq!(job.execution_time(), later);

        job.transition(JobStatus::Pending).unwrap();
        assert!(job.set_execution_time(Utc::now()).is_err());
        assert_eq!(job.execution_time(), later);
    }

    #[test]
    fn test_retry_gets_fresh_identity() {
        let job = job();
        job.transition(JobStatus::Pending).unwrap();
        job.complete(JobStatus::Failed, "upload failed", Utc::now())
            .unwrap();

        let at = Utc::now() + Duration::seconds(600);
        let retry = job.retry_at(at);
        assert_ne!(retry.id(), job.id());
        assert_eq!(retry.status(), JobStatus::Scheduled);
        assert_eq!(retry.execution_time(), at);
        assert_eq!(retry.node_id(), job.node_id());
        assert_eq!(retry.package(), job.package());
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn test_expiry_only_for_terminal_jobs() {
        let job = job();
        let cutoff = Utc::now() + Duration::days(1);
        assert!(!job.is_expired(cutoff));

        job.complete(JobStatus::Cancelled, "", Utc::now()).unwrap();
        assert!(job.is_expired(cutoff));
        assert!(!job.is_expired(Utc::now() - Duration::days(1)));
    }

    #[test]
    fn test_snapshot_carries_package_fields() {
        let snapshot = job().snapshot();
        assert_eq!(snapshot.status, JobStatus::Scheduled);
        assert_eq!(snapshot.status_code, 8);
        assert_eq!(snapshot.package_name, "collector");
        assert_eq!(snapshot.package_file, "collector_2.0.deb");
        assert_eq!(snapshot.node_id, NodeId(10));
    }
}
