//! Node directory built from the configured node inventory.
//!
//! The object graph and the agent transport are provided by the surrounding platform.
//! This standalone directory knows the configured nodes and their platforms; agent
//! connections fail until a transport is wired in, which the scheduler treats as a
//! transient failure.

use async_trait::async_trait;
use pkgdeploy_config::NodeEntry;
use pkgdeploy_core::{
    AccessRights, AgentConnection, Error, ManagedNode, NodeContext, NodeDirectory, NodeId,
    Result, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A node declared in the configuration file.
pub struct ConfiguredNode {
    entry: NodeEntry,
}

impl ConfiguredNode {
    pub fn new(entry: NodeEntry) -> Self {
        Self { entry }
    }
}

#[async_trait]
impl ManagedNode for ConfiguredNode {
    fn id(&self) -> NodeId {
        NodeId(self.entry.id)
    }

    fn name(&self) -> String {
        self.entry.name.clone()
    }

    fn is_local_management_node(&self) -> bool {
        self.entry.local
    }

    fn platform_name(&self) -> String {
        self.entry.platform.clone()
    }

    fn supports_source_packages(&self) -> bool {
        self.entry.supports_source
    }

    fn context(&self) -> NodeContext {
        NodeContext {
            id: self.id(),
            name: self.entry.name.clone(),
            primary_ip: self.entry.address.clone(),
            platform: self.entry.platform.clone(),
            ..Default::default()
        }
    }

    async fn connect_to_agent(&self) -> Result<Box<dyn AgentConnection>> {
        Err(Error::Agent(format!(
            "no agent transport available for {} ({})",
            self.entry.name, self.entry.address
        )))
    }

    fn request_configuration_poll(&self) {
        debug!(node_id = self.entry.id, "Configuration poll requested");
    }
}

/// Directory over the configured nodes.
///
/// Every user holds every right unless rights were restricted for a user and node.
pub struct StaticInventory {
    nodes: HashMap<NodeId, Arc<ConfiguredNode>>,
    restrictions: RwLock<HashMap<(UserId, NodeId), AccessRights>>,
}

impl StaticInventory {
    pub fn new(entries: impl IntoIterator<Item = NodeEntry>) -> Self {
        let nodes = entries
            .into_iter()
            .map(|entry| (NodeId(entry.id), Arc::new(ConfiguredNode::new(entry))))
            .collect();
        Self {
            nodes,
            restrictions: RwLock::new(HashMap::new()),
        }
    }

    /// Limit `user` to `rights` on `node`.
    pub fn restrict(&self, user: UserId, node: NodeId, rights: AccessRights) {
        self.restrictions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((user, node), rights);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeDirectory for StaticInventory {
    fn find_node(&self, id: NodeId) -> Option<Arc<dyn ManagedNode>> {
        let node = self.nodes.get(&id)?.clone();
        Some(node as Arc<dyn ManagedNode>)
    }

    fn check_access(&self, user: UserId, node: NodeId, rights: AccessRights) -> bool {
        self.restrictions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(user, node))
            .is_none_or(|granted| granted.contains(rights))
    }
}
