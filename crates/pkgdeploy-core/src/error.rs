//! Error types for package deployment.

use thiserror::Error;

use crate::job::JobStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("agent error: {0}")]
    Agent(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a deployment attempt ended in `FAILED`.
///
/// Only [`DeploymentFailure::Transient`] leads to a replacement job being scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeploymentFailure {
    /// Missing node, insufficient rights, or a forbidden target.
    #[error("{0}")]
    Validation(String),

    /// Package platform does not match the node.
    #[error("{0}")]
    Compatibility(String),

    /// Agent connection or file transfer failed; worth trying again later.
    #[error("{0}")]
    Transient(String),

    /// Generic package installation failed on the agent.
    #[error("{0}")]
    Installation(String),

    /// The agent did not come back, or came back with the wrong version, after a self-upgrade.
    #[error("{0}")]
    AgentUpgradeVerification(String),
}

impl DeploymentFailure {
    pub fn allows_retry(&self) -> bool {
        matches!(self, DeploymentFailure::Transient(_))
    }
}

/// Outcome of a rejected control request, carrying the request completion code
/// reported back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("access denied")]
    AccessDenied,

    #[error("request is not valid in the current job state")]
    OutOfStateRequest,

    #[error("invalid object id")]
    InvalidObjectId,

    #[error("invalid package id")]
    InvalidPackageId,

    #[error("invalid job id")]
    InvalidJobId,

    #[error("system failure: {0}")]
    Internal(String),
}

impl ControlError {
    /// Request completion code as exposed on the wire. Success is 0.
    pub fn code(&self) -> u32 {
        match self {
            ControlError::AccessDenied => 2,
            ControlError::OutOfStateRequest => 5,
            ControlError::InvalidObjectId => 7,
            ControlError::Internal(_) => 10,
            ControlError::InvalidPackageId => 36,
            ControlError::InvalidJobId => 55,
        }
    }
}

impl From<Error> for ControlError {
    fn from(err: Error) -> Self {
        match err {
            Error::Forbidden(_) => ControlError::AccessDenied,
            Error::InvalidTransition { .. } => ControlError::OutOfStateRequest,
            other => ControlError::Internal(other.to_string()),
        }
    }
}
