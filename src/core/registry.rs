//! Command registry mapping command names to their owners.
//!
//! Core commands are registered first; plugin commands are added on top and
//! may never shadow a core command or another plugin's command. All lookups
//! are case-insensitive.

use std::fmt;

use crate::plugin::{check_min_cli_version, InstalledPlugin, PluginCommand, PluginMetadata};

/// Who handles a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOwner {
    /// Built into the CLI.
    Core,
    /// Provided by the named plugin.
    Plugin(String),
}

/// A registered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    /// Canonical command name
    pub name: String,

    /// Optional alias
    pub alias: Option<String>,

    /// One-line help
    pub help_text: String,

    /// Owner of the command
    pub owner: CommandOwner,
}

impl CommandEntry {
    /// Whether `name` is this command's name or alias (case-insensitive).
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
    }

    /// Name of the owning plugin, if any.
    pub fn plugin(&self) -> Option<&str> {
        match &self.owner {
            CommandOwner::Plugin(name) => Some(name),
            CommandOwner::Core => None,
        }
    }
}

/// A plugin command that was not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationWarning {
    /// Plugin that contributed the command
    pub plugin: String,
    /// Command name, or empty when the whole plugin was skipped
    pub command: String,
    /// Why it was skipped
    pub reason: String,
}

impl fmt::Display for RegistrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command.is_empty() {
            write!(f, "Plugin '{}' skipped: {}", self.plugin, self.reason)
        } else {
            write!(
                f,
                "Command '{}' from plugin '{}' skipped: {}",
                self.command, self.plugin, self.reason
            )
        }
    }
}

/// Registry of core and plugin commands.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    /// All registered commands, core first
    commands: Vec<CommandEntry>,
}

impl CommandRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core command.
    pub fn add_core(
        &mut self,
        name: impl Into<String>,
        alias: Option<String>,
        help_text: impl Into<String>,
    ) {
        self.commands.push(CommandEntry {
            name: name.into(),
            alias,
            help_text: help_text.into(),
            owner: CommandOwner::Core,
        });
    }

    /// Register every command of `plugin` that does not collide.
    ///
    /// Previously registered commands of the same plugin are replaced.
    /// Colliding commands are skipped and reported.
    pub fn register_plugin(&mut self, plugin: &InstalledPlugin) -> Vec<RegistrationWarning> {
        self.unregister_plugin(&plugin.name);

        let mut warnings = Vec::new();
        for command in &plugin.commands {
            if let Some(reason) = self.collision(command, &plugin.name) {
                let warning = RegistrationWarning {
                    plugin: plugin.name.clone(),
                    command: command.name.clone(),
                    reason,
                };
                tracing::warn!("{}", warning);
                warnings.push(warning);
                continue;
            }

            self.commands.push(CommandEntry {
                name: command.name.clone(),
                alias: command.alias.clone(),
                help_text: command.help_text.clone(),
                owner: CommandOwner::Plugin(plugin.name.clone()),
            });
        }

        warnings
    }

    /// Commands of `metadata` that would collide if it were registered.
    ///
    /// Commands owned by `ignore_plugin` are not considered, so a plugin
    /// being reinstalled does not collide with itself.
    pub fn conflicts(
        &self,
        metadata: &PluginMetadata,
        ignore_plugin: Option<&str>,
    ) -> Vec<RegistrationWarning> {
        let mut scratch = self.clone();
        if let Some(plugin) = ignore_plugin {
            scratch.unregister_plugin(plugin);
        }

        let mut warnings = Vec::new();
        for command in &metadata.commands {
            match scratch.collision(command, &metadata.name) {
                Some(reason) => warnings.push(RegistrationWarning {
                    plugin: metadata.name.clone(),
                    command: command.name.clone(),
                    reason,
                }),
                None => scratch.commands.push(CommandEntry {
                    name: command.name.clone(),
                    alias: command.alias.clone(),
                    help_text: command.help_text.clone(),
                    owner: CommandOwner::Plugin(metadata.name.clone()),
                }),
            }
        }
        warnings
    }

    fn collision(&self, command: &PluginCommand, plugin: &str) -> Option<String> {
        for name in command.names() {
            if let Some(existing) = self.find(name) {
                let owner = match &existing.owner {
                    CommandOwner::Core => "a core command".to_string(),
                    CommandOwner::Plugin(p) if p.eq_ignore_ascii_case(plugin) => {
                        "duplicated within the plugin".to_string()
                    }
                    CommandOwner::Plugin(p) => format!("plugin '{p}'"),
                };
                return Some(format!("'{name}' is already used by {owner}"));
            }
        }
        None
    }

    /// Remove every command owned by `plugin`, returning how many were removed.
    pub fn unregister_plugin(&mut self, plugin: &str) -> usize {
        let before = self.commands.len();
        self.commands.retain(|c| !c.plugin().is_some_and(|p| p.eq_ignore_ascii_case(plugin)));
        before - self.commands.len()
    }

    /// Drop all plugin commands and register `plugins` again.
    ///
    /// Plugins requiring a newer CLI than `host_version` are skipped without
    /// affecting the others.
    pub fn rebuild<'a>(
        &mut self,
        plugins: impl IntoIterator<Item = &'a InstalledPlugin>,
        host_version: &str,
    ) -> Vec<RegistrationWarning> {
        self.commands.retain(|c| c.owner == CommandOwner::Core);

        let mut warnings = Vec::new();
        for plugin in plugins {
            if let Err(e) =
                check_min_cli_version(&plugin.name, plugin.min_cli_version.as_deref(), host_version)
            {
                let warning = RegistrationWarning {
                    plugin: plugin.name.clone(),
                    command: String::new(),
                    reason: e.to_string(),
                };
                tracing::warn!("{}", warning);
                warnings.push(warning);
                continue;
            }

            warnings.extend(self.register_plugin(plugin));
        }
        warnings
    }

    /// Find a command by name or alias (case-insensitive).
    pub fn find(&self, name: &str) -> Option<&CommandEntry> {
        self.commands.iter().find(|c| c.matches(name))
    }

    /// Commands owned by `plugin`.
    pub fn plugin_commands<'a>(&'a self, plugin: &'a str) -> impl Iterator<Item = &'a CommandEntry> {
        self.commands.iter().filter(move |c| c.plugin().is_some_and(|p| p.eq_ignore_ascii_case(plugin)))
    }

    /// Get all commands.
    pub fn get_all(&self) -> &[CommandEntry] {
        &self.commands
    }

    /// Get total number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
