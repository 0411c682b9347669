//! Plugin system for cloudctl.
//!
//! Plugins are standalone executables that add commands to the CLI. The
//! host installs them from a local path, a direct URL, or a plugin
//! repository, and talks to them over a local JSON-RPC channel while they
//! run.
//!
//! # Architecture
//!
//! - [`source`] classifies install arguments.
//! - [`repository`], [`downloader`] and [`checksum`] fetch and verify binaries.
//! - [`installer`] turns an install argument into a verified executable.
//! - [`manager`] keeps the installed plugins and their registry file.
//! - [`rpc`] spawns plugins and serves the host capabilities they call.
//! - [`sdk`] is the plugin side of the protocol.
//!
//! # Example Configuration
//!
//! ```toml
//! [plugins]
//! dir = "~/.cloudctl/plugins"
//!
//! [[repositories]]
//! name = "community"
//! url = "https://plugins.cloudctl.dev"
//! ```

pub mod capabilities;
pub mod checksum;
pub mod downloader;
mod error;
mod host;
pub mod installer;
mod manager;
mod platform;
pub mod repository;
pub mod rpc;
pub mod sdk;
pub mod source;
mod types;

pub use capabilities::{CliCapabilities, CloudApi, HttpCloudApi, SessionCapabilities};
pub use error::{ErrorKind, PluginError, PluginResult};
pub use host::{InstallReport, PluginHost};
pub use manager::PluginManager;
pub use platform::{current_platform, platform_for, Platform};
pub use rpc::{CancelToken, PluginRuntime};
pub use types::{
    check_min_cli_version, parse_version, InstalledPlugin, PluginCommand, PluginMetadata, Usage,
    PLUGIN_PROTOCOL_VERSION, REGISTRY_FILE, UNINSTALL_ARG,
};
