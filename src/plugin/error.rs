//! Plugin system error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Broad classification of a [`PluginError`].
///
/// Callers use this to decide whether a failure is fatal for the current
/// operation or can be collected and reported alongside partial results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input could not be resolved to something installable.
    Resolution,
    /// Transport or HTTP failure.
    Network,
    /// Downloaded content does not match the declared checksum.
    Integrity,
    /// The plugin requires a newer host or a different protocol.
    Compatibility,
    /// The plugin failed while running.
    Runtime,
    /// Local filesystem or configuration failure.
    Local,
}

/// Errors that can occur during plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin file not found.
    #[error("File not found locally, make sure the file exists at given path {0}")]
    NotFound(PathBuf),

    /// Source uses a scheme we cannot fetch.
    #[error("Unsupported plugin source '{0}': only http and https downloads are supported")]
    UnsupportedSource(String),

    /// Named repository is not configured.
    #[error("Plugin repository '{0}' not found. Use 'cloudctl add-plugin-repo' to register it")]
    RepositoryNotFound(String),

    /// Repository does not list the requested plugin.
    #[error("Plugin requested '{plugin}' is not available in repo '{repo}'")]
    NotInRepository { plugin: String, repo: String },

    /// Repository lists the plugin but not for this platform.
    #[error("Plugin requested '{plugin}' has no binary available for your OS ({platform})")]
    NoBinaryForPlatform { plugin: String, platform: String },

    /// Plugin not installed.
    #[error("Plugin '{0}' is not installed")]
    NotInstalled(String),

    /// Plugin already installed.
    #[error("Plugin '{0}' is already installed. Use --force to reinstall")]
    AlreadyInstalled(String),

    /// Downloaded binary failed the integrity gate.
    #[error("Downloaded plugin binary's checksum does not match repo metadata (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    /// Plugin version incompatible.
    #[error("Plugin '{name}' requires {required}, but host provides {available}")]
    Incompatible { name: String, required: String, available: String },

    /// No core or plugin command has this name.
    #[error("'{0}' is not a registered command. See 'cloudctl --help'")]
    UnknownCommand(String),

    /// A host capability requested by a plugin failed.
    #[error("Host capability failed: {0}")]
    Capability(String),

    /// Plugin failed during invocation.
    #[error("Plugin '{plugin}' failed: {reason}")]
    RuntimeFault { plugin: String, reason: String },

    /// Invocation interrupted by the user.
    #[error("Plugin '{0}' was interrupted")]
    Cancelled(String),

    /// RPC transport or protocol error.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (repository listings and plugin downloads).
    #[error("Network error: {0}")]
    Network(String),
}

impl PluginError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_)
            | Self::UnsupportedSource(_)
            | Self::RepositoryNotFound(_)
            | Self::NotInRepository { .. }
            | Self::NoBinaryForPlatform { .. }
            | Self::NotInstalled(_)
            | Self::AlreadyInstalled(_)
            | Self::UnknownCommand(_) => ErrorKind::Resolution,
            Self::Network(_) => ErrorKind::Network,
            Self::ChecksumMismatch { .. } => ErrorKind::Integrity,
            Self::Incompatible { .. } => ErrorKind::Compatibility,
            Self::RuntimeFault { .. } | Self::Cancelled(_) | Self::Rpc(_) | Self::Capability(_) => {
                ErrorKind::Runtime
            }
            Self::Io(_) | Self::Config(_) => ErrorKind::Local,
        }
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rpc(err.to_string())
    }
}
