//! cloudctl - command-line client for a cloud platform, extensible with plugins.
//!
//! Built-in commands manage plugins and plugin repositories. Any other
//! command is looked up in the command registry and handed to the plugin
//! that provides it.

#![allow(clippy::single_match_else)]

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudctl::core::{CommandRegistry, Config, RepositoryRef};
use cloudctl::plugin::checksum::Sha1Checksum;
use cloudctl::plugin::repository::RepositoryClient;
use cloudctl::plugin::{
    CancelToken, HttpCloudApi, PluginError, PluginHost, SessionCapabilities,
};

/// Exit status after an interrupted plugin command.
const EXIT_INTERRUPTED: u8 = 130;

/// Command-line client for the cloud platform
#[derive(Parser)]
#[command(name = "cloudctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins and their commands
    Plugins {
        /// Show the SHA-1 of each plugin executable
        #[arg(long)]
        checksum: bool,
    },

    /// Install a plugin from a path, a URL, or a repository
    InstallPlugin {
        /// Plugin path, URL, or name (with --repo)
        source: String,

        /// Repository to install the named plugin from
        #[arg(short, long)]
        repo: Option<String>,

        /// Replace an installed plugin with the same name
        #[arg(short, long)]
        force: bool,
    },

    /// Uninstall a plugin
    UninstallPlugin {
        /// Plugin name
        name: String,
    },

    /// Register a plugin repository
    AddPluginRepo {
        /// Repository name
        name: String,

        /// Repository URL
        url: String,
    },

    /// Remove a registered plugin repository
    RemovePluginRepo {
        /// Repository name
        name: String,
    },

    /// List registered plugin repositories
    ListPluginRepos,

    /// List plugins available in the registered repositories
    RepoPlugins {
        /// Only list this repository
        #[arg(short, long)]
        repo: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Plugin command
    #[command(external_subcommand)]
    External(Vec<String>),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(PluginError::Cancelled(_)) = e.downcast_ref::<PluginError>() {
                eprintln!("\n{e}");
                return ExitCode::from(EXIT_INTERRUPTED);
            }
            eprintln!("FAILED\n{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Plugins { checksum } => cmd_plugins(checksum),
        Commands::InstallPlugin { source, repo, force } => {
            cmd_install_plugin(&source, repo.as_deref(), force)
        }
        Commands::UninstallPlugin { name } => cmd_uninstall_plugin(&name),
        Commands::AddPluginRepo { name, url } => cmd_add_plugin_repo(name, url),
        Commands::RemovePluginRepo { name } => cmd_remove_plugin_repo(&name),
        Commands::ListPluginRepos => cmd_list_plugin_repos(),
        Commands::RepoPlugins { repo } => cmd_repo_plugins(repo.as_deref()),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
        Commands::Config { path } => cmd_config(path),
        Commands::External(args) => cmd_plugin_command(&args),
    }
}

/// Registry holding the built-in commands.
fn core_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    for sub in Cli::command().get_subcommands() {
        let alias = sub.get_visible_aliases().next().map(str::to_string);
        let about = sub.get_about().map(ToString::to_string).unwrap_or_default();
        registry.add_core(sub.get_name(), alias, about);
    }
    registry.add_core("help", None, "Print help");
    registry
}

fn load_host() -> Result<PluginHost> {
    let config = Config::load().context("Failed to load configuration")?;
    let api = HttpCloudApi::new(&config.session, &config.http)?;
    let capabilities = SessionCapabilities::new(config.session.clone(), Arc::new(api));

    Ok(PluginHost::new(config, core_registry(), Arc::new(capabilities))?)
}

/// List installed plugins.
fn cmd_plugins(show_checksum: bool) -> Result<()> {
    let host = load_host()?;

    println!("Listing installed plugins...\n");

    if host.manager().count() == 0 {
        println!("No plugins installed.");
        println!("\nInstall plugins with:");
        println!("  cloudctl install-plugin ./my-plugin          # From file");
        println!("  cloudctl install-plugin my-plugin -r community  # From a repository");
        return Ok(());
    }

    if show_checksum {
        println!("{:<24} {:<12} {}", "plugin name", "version", "sha1");
        for plugin in host.manager().list() {
            let sha1 = Sha1Checksum::new(&plugin.executable_path)
                .compute_file_sha1()
                .unwrap_or_else(|_| "N/A".to_string());
            println!(
                "{:<24} {:<12} {}",
                plugin.name,
                plugin.version.as_deref().unwrap_or("N/A"),
                sha1
            );
        }
        return Ok(());
    }

    println!("{:<24} {:<12} {:<24} {}", "plugin name", "version", "command name", "command help");
    for plugin in host.manager().list() {
        let version = plugin.version.as_deref().unwrap_or("N/A");
        for command in host.registry().plugin_commands(&plugin.name) {
            let names = match &command.alias {
                Some(alias) => format!("{}, {}", command.name, alias),
                None => command.name.clone(),
            };
            println!("{:<24} {:<12} {:<24} {}", plugin.name, version, names, command.help_text);
        }
    }

    for warning in host.startup_warnings() {
        eprintln!("Warning: {warning}");
    }

    Ok(())
}

/// Install a plugin.
fn cmd_install_plugin(source: &str, repo: Option<&str>, force: bool) -> Result<()> {
    let mut host = load_host()?;

    match repo {
        Some(repo) => println!("Looking up '{source}' from repository '{repo}'"),
        None => println!("Installing plugin {source}..."),
    }

    let report = host.install(source, repo, force)?;

    for warning in &report.warnings {
        eprintln!("Warning: {warning}");
    }

    println!("OK\n");
    println!(
        "Plugin {} {} successfully installed.",
        report.plugin.name,
        report.plugin.version.as_deref().unwrap_or("")
    );

    Ok(())
}

/// Uninstall a plugin.
fn cmd_uninstall_plugin(name: &str) -> Result<()> {
    let mut host = load_host()?;

    println!("Uninstalling plugin {name}...");
    let removed = host.uninstall(name)?;

    println!("OK\n");
    println!("Plugin {} successfully uninstalled.", removed.name);

    Ok(())
}

/// Register a plugin repository after checking that it answers.
fn cmd_add_plugin_repo(name: String, url: String) -> Result<()> {
    let mut config = Config::load()?;
    let repo = RepositoryRef::new(name, url);
    config.add_repository(repo.clone())?;

    let listing = RepositoryClient::new(&config.http)?.get_plugins(std::slice::from_ref(&repo));
    if let Some(error) = listing.errors.first() {
        anyhow::bail!("{error}\nCould not add repository '{}' from {}", repo.name, repo.url);
    }

    config.save()?;
    println!("{} added as '{}'", repo.url, repo.name);

    Ok(())
}

/// Remove a plugin repository.
fn cmd_remove_plugin_repo(name: &str) -> Result<()> {
    let mut config = Config::load()?;
    let removed = config.remove_repository(name)?;
    config.save()?;

    println!("{} has been removed from the list of plugin repositories.", removed.name);
    Ok(())
}

/// List registered repositories.
fn cmd_list_plugin_repos() -> Result<()> {
    let config = Config::load()?;

    println!("{:<24} {}", "repo name", "url");
    for repo in &config.repositories {
        println!("{:<24} {}", repo.name, repo.url);
    }

    Ok(())
}

/// List plugins published by the registered repositories.
fn cmd_repo_plugins(repo: Option<&str>) -> Result<()> {
    let host = load_host()?;

    println!("Getting plugins from all repositories...\n");
    let listing = host.repository_plugins(repo)?;

    let mut repos: Vec<_> = listing.plugins.iter().collect();
    repos.sort_by(|a, b| a.0.cmp(b.0));

    for (repo_name, plugins) in repos {
        println!("Repository: {repo_name}");
        println!("{:<24} {:<12} {}", "name", "version", "description");
        for plugin in plugins {
            println!(
                "{:<24} {:<12} {}",
                plugin.name,
                plugin.version_or_unknown(),
                plugin.description.as_deref().unwrap_or("")
            );
        }
        println!();
    }

    if !listing.is_complete() {
        eprintln!("Logged errors:");
        for error in &listing.errors {
            eprintln!("{error}");
        }
        if repo.is_some() {
            anyhow::bail!("Repository query failed");
        }
    }

    Ok(())
}

/// Hand a command to the plugin that provides it.
fn cmd_plugin_command(args: &[String]) -> Result<()> {
    let Some((command, rest)) = args.split_first() else {
        anyhow::bail!("No command given. See 'cloudctl --help'");
    };

    let host = load_host()?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    host.invoke(command, rest, &cancel)?;
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "cloudctl", &mut io::stdout());
}

/// Show configuration.
fn cmd_config(show_path: bool) -> Result<()> {
    if show_path {
        if let Some(path) = Config::config_dir() {
            println!("{}", path.display());
        }
        return Ok(());
    }

    let config = Config::load()?;
    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}
