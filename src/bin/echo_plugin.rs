//! Reference plugin for cloudctl.
//!
//! Provides `echo` (alias `ec`), which prints its arguments, and
//! `whoami-org`, which asks the host for the targeted org. `echo-wait`,
//! `echo-panic` and `echo-fail` exercise the host's cancellation and fault
//! handling.
//!
//! `ECHO_PLUGIN_NAME` and `ECHO_PLUGIN_MIN_CLI_VERSION` override the
//! reported metadata.

use cloudctl::plugin::sdk::{self, CliConnection, Plugin};
use cloudctl::plugin::{PluginCommand, PluginMetadata, PLUGIN_PROTOCOL_VERSION, UNINSTALL_ARG};

struct EchoPlugin;

impl Plugin for EchoPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: std::env::var("ECHO_PLUGIN_NAME").unwrap_or_else(|_| "echo".to_string()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            min_cli_version: std::env::var("ECHO_PLUGIN_MIN_CLI_VERSION").ok(),
            commands: vec![
                PluginCommand::new("echo", "Print the given arguments")
                    .with_alias("ec")
                    .with_usage("cloudctl echo [TEXT...]"),
                PluginCommand::new("whoami-org", "Print the targeted organization")
                    .with_usage("cloudctl whoami-org"),
                PluginCommand::new("echo-wait", "Sleep for the given number of seconds")
                    .with_usage("cloudctl echo-wait SECONDS"),
                PluginCommand::new("echo-panic", "Crash the plugin"),
                PluginCommand::new("echo-fail", "Report a failure"),
            ],
            protocol_version: PLUGIN_PROTOCOL_VERSION,
        }
    }

    fn run(&self, cli: &CliConnection, args: &[String]) -> Result<(), String> {
        let Some(command) = args.first() else {
            return Err("no command given".to_string());
        };

        match command.as_str() {
            UNINSTALL_ARG => {
                println!("echo plugin uninstalled, bye");
                Ok(())
            }
            "echo" | "ec" => {
                println!("{}", args[1..].join(" "));
                Ok(())
            }
            "whoami-org" => match cli.get_current_org().map_err(|e| e.to_string())? {
                Some(org) => {
                    println!("{}", org.name);
                    Ok(())
                }
                None => Err("No org targeted".to_string()),
            },
            "echo-wait" => {
                let secs: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
                std::thread::sleep(std::time::Duration::from_secs(secs));
                Ok(())
            }
            "echo-panic" => panic!("echo plugin panicked on purpose"),
            "echo-fail" => Err("echo plugin failed on purpose".to_string()),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

fn main() {
    if let Err(e) = sdk::start(&EchoPlugin) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
