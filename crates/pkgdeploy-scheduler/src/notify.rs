//! Job status notifications fanned out to observers.

use pkgdeploy_core::{AccessRights, JobNotifier, JobSnapshot, NodeDirectory, UserId};
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::trace;

/// Channel observers subscribe to for deployment job updates.
pub const DEPLOYMENT_CHANNEL: &str = "package-deployment";

/// In-process notifier backed by a broadcast channel.
///
/// Publishing never blocks; slow receivers lose the oldest snapshots.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<JobSnapshot>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl JobNotifier for BroadcastNotifier {
    fn publish(&self, snapshot: JobSnapshot) {
        // No receivers is not an error.
        if self.tx.send(snapshot).is_err() {
            trace!("No observers for job notification");
        }
    }
}

/// One connected observer: who it is and which channels it listens on.
#[derive(Debug, Clone)]
pub struct Observer {
    pub user: UserId,
    channels: HashSet<String>,
}

impl Observer {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            channels: HashSet::new(),
        }
    }

    pub fn subscribe(&mut self, channel: impl Into<String>) {
        self.channels.insert(channel.into());
    }

    pub fn unsubscribe(&mut self, channel: &str) {
        self.channels.remove(channel);
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// Whether this observer should receive the snapshot.
    pub fn accepts(&self, snapshot: &JobSnapshot, nodes: &dyn NodeDirectory) -> bool {
        self.is_subscribed(DEPLOYMENT_CHANNEL)
            && nodes.user_has_access(self.user, snapshot.node_id, AccessRights::READ)
    }
}
