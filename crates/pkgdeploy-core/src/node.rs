//! Managed nodes and the agent command channel.
//!
//! The object graph and the agent transport live outside this system; these traits are
//! the surface the deployment executor consumes from them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::ops::BitOr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::id::{NodeId, UserId};

/// Object access rights bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessRights(u32);

impl AccessRights {
    pub const READ: AccessRights = AccessRights(0x0000_0001);
    pub const MODIFY: AccessRights = AccessRights(0x0000_0002);
    pub const CONTROL: AccessRights = AccessRights(0x0000_0100);
    pub const UPLOAD: AccessRights = AccessRights(0x0000_2000);

    /// Rights a requester needs on a node to deploy a package to it.
    pub const DEPLOY: AccessRights =
        AccessRights(Self::MODIFY.0 | Self::CONTROL.0 | Self::UPLOAD.0);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: AccessRights) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessRights {
    type Output = AccessRights;

    fn bitor(self, rhs: AccessRights) -> AccessRights {
        AccessRights(self.0 | rhs.0)
    }
}

/// Node attributes available to `@`-command macro expansion.
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    pub id: NodeId,
    pub name: String,
    pub primary_ip: String,
    pub platform: String,
    pub agent_version: String,
    /// Custom attributes set on the node.
    pub attributes: HashMap<String, String>,
}

/// An open command channel to a node's agent.
#[async_trait]
pub trait AgentConnection: Send + Sync {
    /// Upload a local file to the agent's file store under `remote_name`.
    async fn upload_file(&self, local_path: &Path, remote_name: &str) -> Result<()>;

    /// Run the package installer for an uploaded file.
    async fn install_package(
        &self,
        file: &str,
        package_type: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Start the agent's self-upgrade from an uploaded installer.
    async fn start_upgrade(&self, file: &str) -> Result<()>;

    /// Read a single agent parameter (e.g. "Agent.Version").
    async fn get_parameter(&self, name: &str) -> Result<String>;

    async fn disconnect(&self);
}

/// A node that packages can be deployed to.
#[async_trait]
pub trait ManagedNode: Send + Sync {
    fn id(&self) -> NodeId;

    fn name(&self) -> String;

    /// Whether this node is the management server's own node.
    fn is_local_management_node(&self) -> bool;

    /// Platform name reported by the agent (e.g. "Linux-x86_64").
    fn platform_name(&self) -> String;

    fn supports_source_packages(&self) -> bool;

    fn context(&self) -> NodeContext;

    /// Open a new connection to the node's agent.
    async fn connect_to_agent(&self) -> Result<Box<dyn AgentConnection>>;

    /// Queue a configuration re-poll. Must not block.
    fn request_configuration_poll(&self);
}

/// Lookup and access checks against the object graph.
pub trait NodeDirectory: Send + Sync {
    fn find_node(&self, id: NodeId) -> Option<Arc<dyn ManagedNode>>;

    fn check_access(&self, user: UserId, node: NodeId, rights: AccessRights) -> bool;

    /// Access check that lets the system user through unconditionally.
    fn user_has_access(&self, user: UserId, node: NodeId, rights: AccessRights) -> bool {
        user.is_system() || self.check_access(user, node, rights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_rights() {
        let rights = AccessRights::READ | AccessRights::MODIFY | AccessRights::CONTROL;
        assert!(!rights.contains(AccessRights::DEPLOY));
        assert!((rights | AccessRights::UPLOAD).contains(AccessRights::DEPLOY));
        assert_eq!(AccessRights::DEPLOY.bits(), 0x2102);
    }
}
