//! Core types for cloudctl.
//!
//! This module contains the configuration layer and the command registry
//! shared by the CLI and the plugin system.

mod config;
mod registry;

pub use config::{
    normalize_repo_url, Config, HttpConfig, PluginsConfig, RepositoryRef, RpcConfig,
    SessionConfig, TargetRef, DEFAULT_REPO_NAME, DEFAULT_REPO_URL, HOME_ENV,
};
pub use registry::{CommandEntry, CommandOwner, CommandRegistry, RegistrationWarning};
