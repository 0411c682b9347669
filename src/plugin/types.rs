//! Core plugin types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::{PluginError, PluginResult};

/// Version of the host/plugin RPC interface.
///
/// Bumped whenever a method signature on either side changes.
pub const PLUGIN_PROTOCOL_VERSION: u32 = 1;

/// Argument passed to a plugin when it is being uninstalled.
pub const UNINSTALL_ARG: &str = "CLI-MESSAGE-UNINSTALL";

/// Registry file name inside the plugins directory.
pub const REGISTRY_FILE: &str = "registry.json";

/// Usage information for a plugin command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Usage line, e.g. `cloudctl echo [-n] TEXT`.
    #[serde(default)]
    pub text: String,
    /// Option name to description.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// A command contributed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommand {
    /// Command name.
    pub name: String,
    /// Optional short alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// One-line help text.
    #[serde(default)]
    pub help_text: String,
    /// Usage details.
    #[serde(default)]
    pub usage: Usage,
}

impl PluginCommand {
    /// Create a command with just a name and help text.
    pub fn new(name: impl Into<String>, help_text: impl Into<String>) -> Self {
        Self { name: name.into(), alias: None, help_text: help_text.into(), usage: Usage::default() }
    }

    /// Set the alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the usage text.
    pub fn with_usage(mut self, text: impl Into<String>) -> Self {
        self.usage.text = text.into();
        self
    }

    /// Name and alias, in that order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.alias.as_deref())
    }

    /// Whether `name` matches this command's name or alias (case-insensitive).
    pub fn matches(&self, name: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Metadata a plugin reports about itself during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    #[serde(default)]
    pub version: Option<String>,
    /// Minimum host version required to register the plugin's commands.
    #[serde(default)]
    pub min_cli_version: Option<String>,
    /// Commands the plugin provides.
    #[serde(default)]
    pub commands: Vec<PluginCommand>,
    /// Protocol version the plugin was built against.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

fn default_protocol_version() -> u32 {
    PLUGIN_PROTOCOL_VERSION
}

impl PluginMetadata {
    /// Ensure the plugin speaks our protocol and accepts this host version.
    pub fn check_compatible(&self, host_version: &str) -> PluginResult<()> {
        if self.protocol_version != PLUGIN_PROTOCOL_VERSION {
            return Err(PluginError::Incompatible {
                name: self.name.clone(),
                required: format!("plugin protocol v{}", self.protocol_version),
                available: format!("plugin protocol v{PLUGIN_PROTOCOL_VERSION}"),
            });
        }
        check_min_cli_version(&self.name, self.min_cli_version.as_deref(), host_version)
    }
}

/// A plugin recorded in the local registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    /// Plugin name.
    pub name: String,
    /// Path to the installed executable.
    pub executable_path: PathBuf,
    /// Commands the plugin provides.
    #[serde(default)]
    pub commands: Vec<PluginCommand>,
    /// Minimum host version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cli_version: Option<String>,
    /// Plugin version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl InstalledPlugin {
    /// Build a registry entry from negotiated metadata.
    pub fn from_metadata(metadata: PluginMetadata, executable_path: PathBuf) -> Self {
        Self {
            name: metadata.name,
            executable_path,
            commands: metadata.commands,
            min_cli_version: metadata.min_cli_version,
            version: metadata.version,
        }
    }

    /// Find a command by name or alias.
    pub fn command(&self, name: &str) -> Option<&PluginCommand> {
        self.commands.iter().find(|c| c.matches(name))
    }
}

/// Parse a possibly short version string ("6", "6.7", "6.7.0-beta").
pub fn parse_version(input: &str) -> Option<Version> {
    let trimmed = input.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&format!("{}{}", parts.join("."), rest)).ok()
}

/// Check a plugin's declared minimum host version against `host_version`.
///
/// A missing or unparsable minimum imposes no requirement.
pub fn check_min_cli_version(
    plugin: &str,
    min_cli_version: Option<&str>,
    host_version: &str,
) -> PluginResult<()> {
    let Some(required) = min_cli_version.filter(|v| !v.trim().is_empty()) else {
        return Ok(());
    };

    let Some(required_version) = parse_version(required) else {
        tracing::warn!(plugin, required, "Ignoring unparsable minimum CLI version");
        return Ok(());
    };

    let host = parse_version(host_version).ok_or_else(|| {
        PluginError::Config(format!("host version '{host_version}' is not a valid version"))
    })?;

    if required_version > host {
        return Err(PluginError::Incompatible {
            name: plugin.to_string(),
            required: format!("CLI version {required}"),
            available: host_version.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_matches_name_and_alias() {
        let cmd = PluginCommand::new("echo", "Echo arguments").with_alias("e");

        assert!(cmd.matches("ECHO"));
        assert!(cmd.matches("e"));
        assert!(!cmd.matches("ec"));
        assert_eq!(cmd.names().collect::<Vec<_>>(), vec!["echo", "e"]);
    }

    #[test]
    fn test_parse_short_versions() {
        assert_eq!(parse_version("6"), Some(Version::new(6, 0, 0)));
        assert_eq!(parse_version("6.7"), Some(Version::new(6, 7, 0)));
        assert_eq!(parse_version("v6.7.1"), Some(Version::new(6, 7, 1)));
        assert!(parse_version("6.7-beta").is_some());
        assert!(parse_version("six").is_none());
    }

    #[test]
    fn test_min_cli_version_gate() {
        assert!(check_min_cli_version("p", None, "0.3.0").is_ok());
        assert!(check_min_cli_version("p", Some(""), "0.3.0").is_ok());
        assert!(check_min_cli_version("p", Some("0.2"), "0.3.0").is_ok());
        assert!(check_min_cli_version("p", Some("0.3.0"), "0.3.0").is_ok());

        let err = check_min_cli_version("p", Some("1.0.0"), "0.3.0").unwrap_err();
        assert!(matches!(err, PluginError::Incompatible { .. }));
    }

    #[test]
    fn test_metadata_protocol_mismatch() {
        let metadata = PluginMetadata {
            name: "old".to_string(),
            version: None,
            min_cli_version: None,
            commands: vec![],
            protocol_version: PLUGIN_PROTOCOL_VERSION + 1,
        };

        assert!(matches!(metadata.check_compatible("0.3.0"), Err(PluginError::Incompatible { .. })));
    }

    #[test]
    fn test_metadata_defaults_protocol_version() {
        let metadata: PluginMetadata = serde_json::from_str(r#"{"name":"p"}"#).unwrap();
        assert_eq!(metadata.protocol_version, PLUGIN_PROTOCOL_VERSION);
        assert!(metadata.commands.is_empty());
    }
}
