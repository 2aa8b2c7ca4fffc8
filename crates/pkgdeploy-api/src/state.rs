//! Application state.

use pkgdeploy_core::NodeDirectory;
use pkgdeploy_scheduler::{BroadcastNotifier, JobScheduler};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
    pub notifier: Arc<BroadcastNotifier>,
    pub nodes: Arc<dyn NodeDirectory>,
}

impl AppState {
    pub fn new(
        scheduler: Arc<JobScheduler>,
        notifier: Arc<BroadcastNotifier>,
        nodes: Arc<dyn NodeDirectory>,
    ) -> Self {
        Self {
            scheduler,
            notifier,
            nodes,
        }
    }
}
