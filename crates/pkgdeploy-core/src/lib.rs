//! Core domain types and traits for the package deployment orchestrator.
//!
//! This crate contains:
//! - Job, node, user and package identifiers
//! - The deployment job record and its status state machine
//! - Package details and the deployment action chosen from them
//! - Collaborator traits (managed nodes, agent connections, persistence, notification)
//! - Error taxonomies for execution failures and control requests

pub mod error;
pub mod id;
pub mod job;
pub mod node;
pub mod package;
pub mod poll;
pub mod repo;

pub use error::{ControlError, DeploymentFailure, Error, Result};
pub use id::{JobId, NodeId, PackageId, UserId};
pub use job::{DeploymentJob, JobHandle, JobSnapshot, JobStatus};
pub use node::{AccessRights, AgentConnection, ManagedNode, NodeContext, NodeDirectory};
pub use package::{DeploymentAction, PackageDetails};
pub use repo::{DeploymentJobRepo, JobNotifier, PackageCatalog, StoredJob};
