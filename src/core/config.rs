//! Configuration management for cloudctl.
//!
//! Handles loading and saving configuration from TOML files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration directory.
pub const HOME_ENV: &str = "CLOUDCTL_HOME";

/// Name of the repository registered by default.
pub const DEFAULT_REPO_NAME: &str = "community";

/// URL of the repository registered by default.
pub const DEFAULT_REPO_URL: &str = "https://plugins.cloudctl.dev";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP settings for repository listings and downloads
    pub http: HttpConfig,

    /// Plugin RPC settings
    pub rpc: RpcConfig,

    /// Plugin storage settings
    pub plugins: PluginsConfig,

    /// Registered plugin repositories
    pub repositories: Vec<RepositoryRef>,

    /// Current login session and target
    pub session: SessionConfig,

    /// Path this configuration was loaded from
    #[serde(skip)]
    path: Option<PathBuf>,
}

/// HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Plugin RPC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long to wait for a plugin to bind its RPC port
    pub connect_timeout_ms: u64,
    /// How long a plugin may take to answer `Plugin.GetMetadata`
    pub metadata_timeout_ms: u64,
}

/// Plugin storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory holding installed plugin executables (`~` is expanded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// A plugin repository registered by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Repository name (unique, case-insensitive)
    pub name: String,
    /// Base URL of the repository service
    pub url: String,
}

impl RepositoryRef {
    /// Create a repository reference.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { name: name.into(), url: url.into() }
    }
}

/// Login session and targeted org/space.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cloud API endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Cloud API version reported by the endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// OAuth access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Logged in user name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Logged in user GUID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_guid: Option<String>,

    /// Logged in user email
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,

    /// Targeted organization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<TargetRef>,

    /// Targeted space
    #[serde(skip_serializing_if = "Option::is_none")]
    pub space: Option<TargetRef>,

    /// Skip TLS certificate validation against the API
    pub skip_ssl_validation: bool,
}

/// A targeted organization or space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Resource GUID
    pub guid: String,
    /// Resource name
    pub name: String,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `$CLOUDCTL_HOME/config.toml`
    /// 2. `~/.config/cloudctl/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let Some(path) = Self::default_path() else {
            return Ok(Self::default());
        };

        if path.exists() {
            return Self::load_from_file(&path);
        }

        let mut config = Self::default();
        config.path = Some(path);
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to the file it was loaded from (or the default location).
    pub fn save(&self) -> anyhow::Result<()> {
        let path = self
            .path
            .clone()
            .or_else(Self::default_path)
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        match std::env::var_os(HOME_ENV) {
            Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
            _ => dirs::config_dir().map(|d| d.join("cloudctl")),
        }
    }

    fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("config.toml"))
    }

    /// Directory where plugin executables and the plugin registry live.
    pub fn plugins_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(ref dir) = self.plugins.dir {
            let expanded = shellexpand::tilde(dir);
            return Ok(PathBuf::from(expanded.as_ref()));
        }

        Self::config_dir()
            .map(|d| d.join("plugins"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine plugins directory"))
    }

    /// Find a registered repository by name (case-insensitive).
    pub fn find_repository(&self, name: &str) -> Option<&RepositoryRef> {
        self.repositories.iter().find(|r| r.name.eq_ignore_ascii_case(name))
    }

    /// Register a repository, rejecting duplicate names or URLs.
    pub fn add_repository(&mut self, repo: RepositoryRef) -> anyhow::Result<()> {
        if repo.name.trim().is_empty() {
            anyhow::bail!("Repository name cannot be empty");
        }

        if let Some(existing) = self.find_repository(&repo.name) {
            anyhow::bail!("Plugin repo named '{}' already exists", existing.name);
        }

        let url = normalize_repo_url(&repo.url);
        if let Some(existing) = self.repositories.iter().find(|r| normalize_repo_url(&r.url) == url)
        {
            anyhow::bail!("{} ({}) already exists", existing.url, existing.name);
        }

        self.repositories.push(repo);
        Ok(())
    }

    /// Remove a repository by name (case-insensitive).
    pub fn remove_repository(&mut self, name: &str) -> anyhow::Result<RepositoryRef> {
        let pos = self
            .repositories
            .iter()
            .position(|r| r.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow::anyhow!("Plugin repo '{}' does not exist", name))?;

        Ok(self.repositories.remove(pos))
    }
}

impl HttpConfig {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build a blocking HTTP client honoring these settings.
    pub fn client(&self) -> reqwest::Result<reqwest::blocking::Client> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout())
            .user_agent(format!("cloudctl/{}", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

impl RpcConfig {
    /// Plugin bind timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Metadata negotiation timeout as a duration.
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

/// Strip trailing slashes so URLs compare and join consistently.
pub fn normalize_repo_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            rpc: RpcConfig::default(),
            plugins: PluginsConfig::default(),
            repositories: vec![RepositoryRef::new(DEFAULT_REPO_NAME, DEFAULT_REPO_URL)],
            session: SessionConfig::default(),
            path: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { connect_timeout_ms: 5000, metadata_timeout_ms: 10_000 }
    }
}
