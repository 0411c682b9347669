#![allow(clippy::format_push_string)]
#![allow(clippy::unused_self)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]

//! # cloudctl
//!
//! Command-line client for a cloud platform, extensible with plugins.
//!
//! Plugins are standalone executables that contribute commands. The host
//! installs them from a path, a URL, or a plugin repository, verifies
//! repository downloads by SHA-1, and talks to running plugins over a local
//! JSON-RPC channel through which they can call back into the CLI.
//!
//! ## Features
//!
//! - **Plugin repositories**: Query any number of repositories concurrently
//! - **Verified installs**: Platform-specific binaries checked against published checksums
//! - **Command registry**: Plugin commands never shadow built-ins or each other
//! - **Plugin SDK**: Write plugins in Rust with [`plugin::sdk`]
//!
//! ## Quick Start
//!
//! ```bash
//! cloudctl install-plugin echo -r community
//! cloudctl echo hello world
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::redundant_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::uninlined_format_args)]

pub mod core;
pub mod plugin;

pub use core::{CommandRegistry, Config};
pub use plugin::{PluginError, PluginHost, PluginResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "cloudctl";
