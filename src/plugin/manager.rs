//! Plugin manager for installing and tracking plugin executables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::installer::set_executable;
use super::{InstalledPlugin, PluginError, PluginMetadata, PluginResult, REGISTRY_FILE};

/// Plugin registry file format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PluginRegistry {
    plugins: BTreeMap<String, InstalledPlugin>,
}

/// Manages the installed plugin executables and their registry file.
pub struct PluginManager {
    /// Directory where plugins are stored.
    plugins_dir: PathBuf,
    /// Installed plugins, keyed by name.
    plugins: BTreeMap<String, InstalledPlugin>,
}

impl PluginManager {
    /// Create a new plugin manager.
    pub fn new(plugins_dir: PathBuf) -> PluginResult<Self> {
        std::fs::create_dir_all(&plugins_dir)?;

        let mut manager = Self { plugins_dir, plugins: BTreeMap::new() };
        manager.load_registry()?;

        Ok(manager)
    }

    /// Get the plugins directory.
    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    fn registry_path(&self) -> PathBuf {
        self.plugins_dir.join(REGISTRY_FILE)
    }

    fn load_registry(&mut self) -> PluginResult<()> {
        let registry_path = self.registry_path();

        if registry_path.exists() {
            let content = std::fs::read_to_string(&registry_path)?;
            let registry: PluginRegistry = serde_json::from_str(&content).map_err(|e| {
                PluginError::Config(format!("{}: {e}", registry_path.display()))
            })?;
            self.plugins = registry.plugins;
        }

        Ok(())
    }

    fn save_registry(&self) -> PluginResult<()> {
        let registry = PluginRegistry { plugins: self.plugins.clone() };

        let content = serde_json::to_string_pretty(&registry)
            .map_err(|e| PluginError::Config(e.to_string()))?;

        std::fs::write(self.registry_path(), content)?;

        Ok(())
    }

    fn key(&self, name: &str) -> Option<String> {
        self.plugins.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
    }

    /// Install a verified executable under the name reported in `metadata`.
    ///
    /// An existing plugin of the same name is only replaced when `force`
    /// is set. The registry is written last, once the copy succeeded.
    pub fn install(
        &mut self,
        executable: &Path,
        metadata: PluginMetadata,
        force: bool,
    ) -> PluginResult<&InstalledPlugin> {
        let existing = self.key(&metadata.name);
        if let (Some(existing), false) = (&existing, force) {
            return Err(PluginError::AlreadyInstalled(existing.clone()));
        }

        let dest = self.plugins_dir.join(executable_name(&metadata.name));
        if executable != dest {
            std::fs::copy(executable, &dest)?;
        }
        set_executable(&dest, 0o700)?;

        if let Some(previous) = existing.and_then(|k| self.plugins.remove(&k)) {
            if previous.executable_path != dest && previous.executable_path != executable {
                if let Err(e) = std::fs::remove_file(&previous.executable_path) {
                    tracing::debug!(error = %e, "Could not remove replaced executable");
                }
            }
        }

        let installed = InstalledPlugin::from_metadata(metadata, dest);
        let name = installed.name.clone();
        self.plugins.insert(name.clone(), installed);
        self.save_registry()?;

        tracing::info!(plugin = %name, "Plugin installed");
        self.plugins.get(&name).ok_or(PluginError::NotInstalled(name))
    }

    /// Uninstall a plugin (case-insensitive), deleting its executable.
    pub fn uninstall(&mut self, name: &str) -> PluginResult<InstalledPlugin> {
        let key = self.key(name).ok_or_else(|| PluginError::NotInstalled(name.to_string()))?;

        self.remove_files(&key)?;
        let removed = self.plugins.remove(&key).ok_or(PluginError::NotInstalled(key))?;
        self.save_registry()?;

        Ok(removed)
    }

    fn remove_files(&self, key: &str) -> PluginResult<()> {
        if let Some(plugin) = self.plugins.get(key) {
            match std::fs::remove_file(&plugin.executable_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path = %plugin.executable_path.display(), "Executable already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Get an installed plugin by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&InstalledPlugin> {
        self.key(name).and_then(|k| self.plugins.get(&k))
    }

    /// List all installed plugins, sorted by name.
    pub fn list(&self) -> impl Iterator<Item = &InstalledPlugin> {
        self.plugins.values()
    }

    /// Get the number of installed plugins.
    pub fn count(&self) -> usize {
        self.plugins.len()
    }
}

/// File name of an installed plugin executable.
fn executable_name(plugin: &str) -> String {
    if cfg!(windows) {
        format!("{plugin}.exe")
    } else {
        plugin.to_string()
    }
}
