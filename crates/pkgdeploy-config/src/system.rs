//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Interval between reconnection checks after an agent self-upgrade.
pub const AGENT_RECONNECT_STEP: Duration = Duration::from_secs(20);

/// Smallest worker pool the scheduler will run with.
pub const MIN_WORKERS: usize = 2;

/// System-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub deployment: DeploymentConfig,
    pub server: ServerConfig,
    /// Statically configured node inventory.
    pub nodes: Vec<NodeEntry>,
}

/// Settings of the deployment scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Upper bound of concurrently executing jobs.
    pub max_workers: usize,
    /// Timeout handed to the agent for each generic install command.
    pub install_timeout: Duration,
    /// How long to wait for an agent to reconnect after a self-upgrade.
    pub agent_reconnect_wait: Duration,
    /// Terminal jobs older than this many days are swept.
    pub job_retention_days: u32,
    pub retention_sweep_interval: Duration,
    /// Directory holding package files.
    pub package_directory: PathBuf,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            max_workers: 25,
            install_timeout: Duration::from_secs(600),
            agent_reconnect_wait: Duration::from_secs(600),
            job_retention_days: 7,
            retention_sweep_interval: Duration::from_secs(86_400),
            package_directory: PathBuf::from("/var/lib/pkgdeploy/packages"),
        }
    }
}

impl DeploymentConfig {
    /// Apply the worker floor and round the reconnect wait up to whole check steps.
    pub fn normalized(mut self) -> Self {
        self.max_workers = self.max_workers.max(MIN_WORKERS);
        let step = AGENT_RECONNECT_STEP.as_secs();
        let wait = self.agent_reconnect_wait.as_secs().div_ceil(step) * step;
        self.agent_reconnect_wait = Duration::from_secs(wait);
        self
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.job_retention_days))
    }
}

/// Settings of the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            database_url: None,
        }
    }
}

/// A managed node declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: u32,
    pub name: String,
    pub platform: String,
    pub address: String,
    /// Marks the management server's own node.
    pub local: bool,
    pub supports_source: bool,
}

/// Parse system configuration from KDL text. Absent keys keep their defaults.
pub fn parse_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "package-deployment" => {
                config.deployment = parse_deployment(node)?;
            }
            "server" => {
                config.server = parse_server(node)?;
            }
            "nodes" => {
                config.nodes = parse_nodes(node)?;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

fn parse_deployment(node: &KdlNode) -> ConfigResult<DeploymentConfig> {
    let mut config = DeploymentConfig::default();

    let Some(children) = node.children() else {
        return Ok(config);
    };

    for child in children.nodes() {
        let key = child.name().value();
        match key {
            "max-workers" => {
                config.max_workers = get_unsigned_arg(child, key)? as usize;
            }
            "install-timeout" => {
                config.install_timeout = Duration::from_secs(get_unsigned_arg(child, key)?);
            }
            "agent-reconnect-wait" => {
                config.agent_reconnect_wait = Duration::from_secs(get_unsigned_arg(child, key)?);
            }
            "job-retention" => {
                let days = get_unsigned_arg(child, key)?;
                config.job_retention_days =
                    u32::try_from(days).map_err(|_| ConfigError::InvalidValue {
                        field: key.to_string(),
                        message: format!("{} days is out of range", days),
                    })?;
            }
            "retention-sweep-interval" => {
                let secs = get_unsigned_arg(child, key)?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: key.to_string(),
                        message: "interval must be positive".to_string(),
                    });
                }
                config.retention_sweep_interval = Duration::from_secs(secs);
            }
            "package-directory" => {
                config.package_directory = PathBuf::from(get_string_arg(child, key)?);
            }
            _ => {}
        }
    }

    Ok(config.normalized())
}

fn parse_server(node: &KdlNode) -> ConfigResult<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value();
            match key {
                "listen" => config.listen = get_string_arg(child, key)?,
                "database-url" => config.database_url = Some(get_string_arg(child, key)?),
                _ => {}
            }
        }
    }

    Ok(config)
}

fn parse_nodes(node: &KdlNode) -> ConfigResult<Vec<NodeEntry>> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };

    let mut nodes: Vec<NodeEntry> = Vec::new();
    for child in children.nodes().iter().filter(|n| n.name().value() == "node") {
        let id = get_unsigned_arg(child, "node")?;
        let id = u32::try_from(id)
            .ok()
            .filter(|id| *id != 0)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "node".to_string(),
                message: format!("node id {} is out of range", id),
            })?;
        if nodes.iter().any(|n| n.id == id) {
            return Err(ConfigError::InvalidValue {
                field: "node".to_string(),
                message: format!("duplicate node id {}", id),
            });
        }

        nodes.push(NodeEntry {
            id,
            name: get_string_prop(child, "name").unwrap_or_else(|| format!("node-{}", id)),
            platform: get_string_prop(child, "platform").unwrap_or_default(),
            address: get_string_prop(child, "address").unwrap_or_default(),
            local: get_bool_prop(child, "local").unwrap_or(false),
            supports_source: get_bool_prop(child, "supports-source").unwrap_or(false),
        });
    }
    Ok(nodes)
}

// Helper functions for extracting values from KDL nodes

fn first_arg(node: &KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn get_unsigned_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = first_arg(node)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected an integer".to_string(),
        })?;

    u64::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("{} must not be negative", value),
    })
}

fn get_string_arg(node: &KdlNode, field: &str) -> ConfigResult<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected a string".to_string(),
        })
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = parse_config("").unwrap();
        assert_eq!(config.deployment, DeploymentConfig::default());
        assert_eq!(config.deployment.max_workers, 25);
        assert_eq!(config.deployment.job_retention_days, 7);
        assert_eq!(config.server.listen, "0.0.0.0:3000");
    }

    #[test]
    fn test_parse_deployment_section() {
        let kdl = r#"
            package-deployment {
                max-workers 8
                install-timeout 120
                agent-reconnect-wait 300
                job-retention 30
                package-directory "/srv/packages"
            }

            server {
                listen "127.0.0.1:8080"
                database-url "postgres://localhost/pkgdeploy"
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.deployment.max_workers, 8);
        assert_eq!(config.deployment.install_timeout, Duration::from_secs(120));
        assert_eq!(config.deployment.agent_reconnect_wait, Duration::from_secs(300));
        assert_eq!(config.deployment.job_retention_days, 30);
        assert_eq!(
            config.deployment.package_directory,
            PathBuf::from("/srv/packages")
        );
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(
            config.server.database_url.as_deref(),
            Some("postgres://localhost/pkgdeploy")
        );
    }

    #[test]
    fn test_worker_floor_and_reconnect_rounding() {
        let kdl = r#"
            package-deployment {
                max-workers 1
                agent-reconnect-wait 610
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.deployment.max_workers, 2);
        assert_eq!(config.deployment.agent_reconnect_wait, Duration::from_secs(620));
    }

    #[test]
    fn test_parse_node_inventory() {
        let kdl = r#"
            nodes {
                node 1 name="web-01" platform="Linux-x86_64" address="10.0.0.5"
                node 2 name="mgmt" platform="Linux-x86_64" local=#true supports-source=#true
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].name, "web-01");
        assert_eq!(config.nodes[0].address, "10.0.0.5");
        assert!(!config.nodes[0].local);
        assert!(config.nodes[1].local);
        assert!(config.nodes[1].supports_source);
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let kdl = r#"
            nodes {
                node 1 name="a"
                node 1 name="b"
            }
        "#;

        assert!(matches!(
            parse_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_negative_value_rejected() {
        let kdl = r#"
            package-deployment {
                install-timeout -5
            }
        "#;

        let result = parse_config(kdl);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let kdl = r#"
            package-deployment {
                max-workers "many"
            }
        "#;

        assert!(matches!(
            parse_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
