//! Package details and the deployment action chosen from them.

use serde::{Deserialize, Serialize};

use crate::id::PackageId;

/// Package type of installers that replace the remote agent itself.
pub const AGENT_INSTALLER_TYPE: &str = "agent-installer";

/// Platform tag of source packages, installable on any node that supports them.
pub const SOURCE_PLATFORM: &str = "src";

/// Catalog entry for a deployable package. Read once when a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDetails {
    pub id: PackageId,
    /// Package type (e.g. "agent-installer", "deb", "msi", "executable").
    pub package_type: String,
    pub name: String,
    pub version: String,
    /// Target platform name, or "src" for source packages.
    pub platform: String,
    /// File name inside the package directory.
    pub file: String,
    /// Install command; a leading `@` requests macro expansion against the node.
    pub command: String,
    pub description: String,
}

impl PackageDetails {
    pub fn is_source(&self) -> bool {
        self.platform == SOURCE_PLATFORM
    }

    /// Check whether a node with the given platform can take this package.
    pub fn is_compatible_with(&self, node_platform: &str, supports_source: bool) -> bool {
        if self.is_source() {
            supports_source
        } else {
            self.platform.eq_ignore_ascii_case(node_platform)
        }
    }
}

/// What the executor does with the package once it is on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentAction {
    /// Hand the file to the agent's self-upgrade and verify the reported version afterwards.
    AgentUpgrade { target_version: String },
    /// Run the package installer with the given type and command.
    GenericInstall {
        package_type: String,
        command: String,
    },
}

impl DeploymentAction {
    pub fn for_package(package: &PackageDetails) -> Self {
        if package.package_type == AGENT_INSTALLER_TYPE {
            DeploymentAction::AgentUpgrade {
                target_version: package.version.clone(),
            }
        } else {
            DeploymentAction::GenericInstall {
                package_type: package.package_type.clone(),
                command: package.command.clone(),
            }
        }
    }

    pub fn is_agent_upgrade(&self) -> bool {
        matches!(self, DeploymentAction::AgentUpgrade { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(package_type: &str, platform: &str) -> PackageDetails {
        PackageDetails {
            id: PackageId(1),
            package_type: package_type.to_string(),
            name: "agent".to_string(),
            version: "5.1.0".to_string(),
            platform: platform.to_string(),
            file: "agent-5.1.0.tar.gz".to_string(),
            command: String::new(),
            description: String::new(),
        }
    }

    #[test]
    fn test_binary_platform_match_ignores_case() {
        let pkg = package("deb", "Linux-x86_64");
        assert!(pkg.is_compatible_with("linux-X86_64", false));
        assert!(!pkg.is_compatible_with("windows-x64", true));
    }

    #[test]
    fn test_source_package_requires_support() {
        let pkg = package("tgz", "src");
        assert!(pkg.is_compatible_with("anything", true));
        assert!(!pkg.is_compatible_with("src", false));
    }

    #[test]
    fn test_action_chosen_from_package_type() {
        let upgrade = DeploymentAction::for_package(&package("agent-installer", "linux"));
        assert_eq!(
            upgrade,
            DeploymentAction::AgentUpgrade {
                target_version: "5.1.0".to_string()
            }
        );

        let install = DeploymentAction::for_package(&package("deb", "linux"));
        assert!(!install.is_agent_upgrade());
    }
}
