//! HTTP control surface for package deployment.
//!
//! Provides the REST API for scheduling, listing and cancelling deployment jobs and a
//! WebSocket feed of job status changes.

pub mod error;
pub mod inventory;
pub mod requester;
pub mod routes;
pub mod state;
pub mod telemetry;
pub mod ws;

pub use state::AppState;
