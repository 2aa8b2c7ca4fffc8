//! Macro expansion for install commands.
//!
//! An install command starting with `@` is expanded against the target node before it
//! is sent to the agent. Supported macros:
//! - `${node.id}` - Node object id
//! - `${node.name}` - Node name
//! - `${node.ip}` - Primary IP address
//! - `${node.platform}` - Platform name reported by the agent
//! - `${node.agent_version}` - Agent version
//! - `${attr.NAME}` - Custom attribute of the node
//! - `${env.VAR_NAME}` - Environment variable of the server process
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//!
//! Unknown macros are left in place.

use pkgdeploy_core::NodeContext;
use regex::Regex;
use std::sync::LazyLock;

/// Prefix marking a command for macro expansion.
pub const MACRO_PREFIX: char = '@';

// Regex for matching ${...} macros
static MACRO_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_\-]*)?)\}").unwrap()
});

fn resolve(ctx: &NodeContext, name: &str) -> Option<String> {
    let parts: Vec<&str> = name.split('.').collect();

    match parts.as_slice() {
        ["node", "id"] => Some(ctx.id.to_string()),
        ["node", "name"] => Some(ctx.name.clone()),
        ["node", "ip"] => Some(ctx.primary_ip.clone()),
        ["node", "platform"] => Some(ctx.platform.clone()),
        ["node", "agent_version"] => Some(ctx.agent_version.clone()),

        ["attr", attr] => ctx.attributes.get(*attr).cloned(),
        ["env", var] => std::env::var(var).ok(),

        ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
        ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),

        _ => None,
    }
}

/// Expand all `${...}` macros in `input` against the node context.
pub fn expand_macros(input: &str, ctx: &NodeContext) -> String {
    MACRO_REGEX
        .replace_all(input, |caps: &regex::Captures| {
            let name = &caps[1];
            resolve(ctx, name).unwrap_or_else(|| format!("${{{}}}", name))
        })
        .to_string()
}

/// Prepare an install command for sending: commands starting with `@` have the
/// prefix stripped and their macros expanded; anything else is sent verbatim.
pub fn expand_command(command: &str, ctx: &NodeContext) -> String {
    match command.strip_prefix(MACRO_PREFIX) {
        Some(rest) => expand_macros(rest, ctx),
        None => command.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgdeploy_core::NodeId;

    fn context() -> NodeContext {
        let mut ctx = NodeContext {
            id: NodeId(42),
            name: "web-01".to_string(),
            primary_ip: "10.0.0.5".to_string(),
            platform: "Linux-x86_64".to_string(),
            agent_version: "5.0.1".to_string(),
            ..Default::default()
        };
        ctx.attributes
            .insert("install-root".to_string(), "/opt/acme".to_string());
        ctx
    }

    #[test]
    fn test_plain_command_untouched() {
        let cmd = "dpkg -i ${node.name}.deb";
        assert_eq!(expand_command(cmd, &context()), cmd);
    }

    #[test]
    fn test_prefixed_command_expanded() {
        let result = expand_command("@install.sh --host ${node.name} --ip ${node.ip}", &context());
        assert_eq!(result, "install.sh --host web-01 --ip 10.0.0.5");
    }

    #[test]
    fn test_attributes_and_node_id() {
        let result = expand_macros("${attr.install-root}/bin ${node.id}", &context());
        assert_eq!(result, "/opt/acme/bin 42");
    }

    #[test]
    fn test_unknown_macro_preserved() {
        let result = expand_command("@run ${attr.missing} ${bogus.var}", &context());
        assert_eq!(result, "run ${attr.missing} ${bogus.var}");
    }

    #[test]
    fn test_date_macro() {
        let result = expand_macros("${date}", &context());
        assert_eq!(result.len(), 10);
        assert!(result.contains('-'));
    }
}
