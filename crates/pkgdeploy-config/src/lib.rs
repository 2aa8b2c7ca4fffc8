//! KDL configuration parsing for the package deployment orchestrator.
//!
//! This crate handles parsing of:
//! - Deployment scheduler settings (worker pool, timeouts, retention)
//! - Server settings and the static node inventory
//! - Macro expansion of `@`-prefixed install commands

pub mod error;
pub mod macros;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use macros::{expand_command, expand_macros};
pub use system::{
    AGENT_RECONNECT_STEP, DeploymentConfig, MIN_WORKERS, NodeEntry, ServerConfig, SystemConfig,
    load_config, parse_config,
};
