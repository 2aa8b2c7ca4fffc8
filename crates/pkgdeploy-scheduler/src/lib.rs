//! Job scheduling for package deployment.
//!
//! Keeps every known deployment job in a [`JobStore`], queues pending ones by execution
//! time in a [`ScheduledQueue`], and runs a single dispatcher task that hands due jobs to
//! a bounded [`WorkerPool`] where the job executor drives the remote deployment protocol.
//! [`JobScheduler`] owns all of it and exposes the control surface.

mod context;
mod dispatcher;
mod executor;
pub mod notify;
pub mod pool;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use context::RETRY_DELAY_SECS;
pub use executor::AGENT_VERSION_PARAMETER;
pub use notify::{BroadcastNotifier, DEPLOYMENT_CHANNEL, Observer};
pub use pool::WorkerPool;
pub use registry::{JobStore, Registry, ScheduledQueue};
pub use scheduler::JobScheduler;
