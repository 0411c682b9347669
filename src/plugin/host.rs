//! Plugin host tying installation, the registry and the runtime together.

use std::sync::Arc;

use super::capabilities::CliCapabilities;
use super::downloader::Downloader;
use super::installer::{installer_for, InstallerContext};
use super::repository::{RepositoryClient, RepositoryListing};
use super::rpc::{CancelToken, PluginRuntime};
use super::{
    current_platform, InstalledPlugin, PluginError, PluginManager, PluginResult, UNINSTALL_ARG,
};
use crate::core::{CommandRegistry, Config, RegistrationWarning};

/// Result of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// The installed plugin.
    pub plugin: InstalledPlugin,
    /// Commands that were not registered because of name collisions.
    pub warnings: Vec<RegistrationWarning>,
}

/// Installs, removes and runs plugins on behalf of the CLI.
pub struct PluginHost {
    config: Config,
    manager: PluginManager,
    runtime: PluginRuntime,
    registry: CommandRegistry,
    host_version: String,
    startup_warnings: Vec<RegistrationWarning>,
}

impl PluginHost {
    /// Create a host over `registry`, which should already hold the core commands.
    ///
    /// Installed plugins are registered on top of it.
    pub fn new(
        config: Config,
        registry: CommandRegistry,
        capabilities: Arc<dyn CliCapabilities>,
    ) -> PluginResult<Self> {
        let plugins_dir = config.plugins_dir().map_err(|e| PluginError::Config(e.to_string()))?;
        let manager = PluginManager::new(plugins_dir)?;
        let runtime = PluginRuntime::new(capabilities, &config.rpc);

        let mut host = Self {
            config,
            manager,
            runtime,
            registry,
            host_version: crate::VERSION.to_string(),
            startup_warnings: Vec::new(),
        };
        host.rebuild_registry();
        Ok(host)
    }

    /// Use a different host version for compatibility checks.
    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = version.into();
        self.rebuild_registry();
        self
    }

    fn rebuild_registry(&mut self) {
        self.startup_warnings = self.registry.rebuild(self.manager.list(), &self.host_version);
    }

    /// Plugins skipped while building the registry.
    pub fn startup_warnings(&self) -> &[RegistrationWarning] {
        &self.startup_warnings
    }

    /// The command registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// The installed plugins.
    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Install a plugin from a path, URL, or (with `repo`) a repository.
    ///
    /// The plugin is started once to read its metadata. Nothing is persisted
    /// unless it is compatible and not already installed (unless `force`).
    pub fn install(
        &mut self,
        source: &str,
        repo: Option<&str>,
        force: bool,
    ) -> PluginResult<InstallReport> {
        let scratch = tempfile::Builder::new().prefix("cloudctl-plugin-").tempdir()?;

        let mut context = InstallerContext {
            repos: self.config.repositories.clone(),
            downloader: Downloader::new(scratch.path(), &self.config.http)?,
            repository_client: RepositoryClient::new(&self.config.http)?,
            platform: current_platform(),
        };
        let executable = installer_for(&mut context, repo).install(source)?;

        let metadata = self.runtime.fetch_metadata(&executable)?;
        metadata.check_compatible(&self.host_version)?;

        if let Some(existing) = self.manager.get(&metadata.name) {
            if !force {
                return Err(PluginError::AlreadyInstalled(existing.name.clone()));
            }
        }

        let warnings = self.registry.conflicts(&metadata, Some(&metadata.name));
        let plugin = self.manager.install(&executable, metadata, force)?.clone();
        self.registry.register_plugin(&plugin);

        Ok(InstallReport { plugin, warnings })
    }

    /// Uninstall a plugin, giving it a chance to clean up first.
    pub fn uninstall(&mut self, name: &str) -> PluginResult<InstalledPlugin> {
        let plugin = self
            .manager
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;

        if let Err(e) = self.runtime.run(&plugin, vec![UNINSTALL_ARG.to_string()], &CancelToken::new())
        {
            tracing::warn!(plugin = %plugin.name, error = %e, "Plugin uninstall hook failed");
        }

        self.registry.unregister_plugin(&plugin.name);
        self.manager.uninstall(&plugin.name)
    }

    /// Run the plugin command `command` with `args`.
    ///
    /// The plugin receives the canonical command name followed by `args`.
    pub fn invoke(&self, command: &str, args: &[String], cancel: &CancelToken) -> PluginResult<()> {
        let entry = self
            .registry
            .find(command)
            .ok_or_else(|| PluginError::UnknownCommand(command.to_string()))?;
        let plugin_name =
            entry.plugin().ok_or_else(|| PluginError::UnknownCommand(command.to_string()))?;
        let plugin = self
            .manager
            .get(plugin_name)
            .ok_or_else(|| PluginError::NotInstalled(plugin_name.to_string()))?;

        let mut run_args = Vec::with_capacity(args.len() + 1);
        run_args.push(entry.name.clone());
        run_args.extend_from_slice(args);

        tracing::debug!(plugin = %plugin.name, command = %entry.name, "Invoking plugin command");
        self.runtime.run(plugin, run_args, cancel)
    }

    /// List plugins available in one repository, or in all of them.
    pub fn repository_plugins(&self, repo: Option<&str>) -> PluginResult<RepositoryListing> {
        let repos = match repo {
            Some(name) => vec![self
                .config
                .find_repository(name)
                .cloned()
                .ok_or_else(|| PluginError::RepositoryNotFound(name.to_string()))?],
            None => self.config.repositories.clone(),
        };

        Ok(RepositoryClient::new(&self.config.http)?.get_plugins(&repos))
    }
}
