//! Plugin-side half of the RPC protocol, for plugins written in Rust.
//!
//! ```no_run
//! use cloudctl::plugin::sdk::{self, CliConnection, Plugin};
//! use cloudctl::plugin::{PluginCommand, PluginMetadata, PLUGIN_PROTOCOL_VERSION};
//!
//! struct Hello;
//!
//! impl Plugin for Hello {
//!     fn metadata(&self) -> PluginMetadata {
//!         PluginMetadata {
//!             name: "hello".into(),
//!             version: Some("1.0.0".into()),
//!             min_cli_version: None,
//!             commands: vec![PluginCommand::new("hello", "Say hello")],
//!             protocol_version: PLUGIN_PROTOCOL_VERSION,
//!         }
//!     }
//!
//!     fn run(&self, cli: &CliConnection, _args: &[String]) -> Result<(), String> {
//!         let user = cli.username().map_err(|e| e.to_string())?;
//!         println!("hello {}", user.unwrap_or_default());
//!         Ok(())
//!     }
//! }
//!
//! fn main() {
//!     if let Err(e) = sdk::start(&Hello) {
//!         eprintln!("{e}");
//!         std::process::exit(1);
//!     }
//! }
//! ```

#![warn(missing_docs)]

use std::any::Any;
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::rpc::protocol::{
    methods, read_message, write_message, CliCommandParams, GetAppParams, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, RunParams, RunResult, INTERNAL_ERROR, PLUGIN_PANIC,
};
use super::rpc::RpcClient;
use super::{PluginError, PluginMetadata, PluginResult};
use crate::core::TargetRef;

/// A plugin implementation.
pub trait Plugin {
    /// Describe the plugin and its commands.
    fn metadata(&self) -> PluginMetadata;

    /// Run a command. `args[0]` is the command name.
    fn run(&self, cli: &CliConnection, args: &[String]) -> Result<(), String>;
}

/// Serve `plugin` using the ports the host passed on the command line.
///
/// Returns after the host's `Plugin.Run` call has been answered or the host
/// disconnects.
pub fn start(plugin: &dyn Plugin) -> PluginResult<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (plugin_port, host_port) = match args.as_slice() {
        [plugin_port, host_port, ..] => (parse_port(plugin_port)?, parse_port(host_port)?),
        _ => {
            return Err(PluginError::Config(
                "This plugin is not intended to be run on its own; install it with \
                 'cloudctl install-plugin'"
                    .to_string(),
            ))
        }
    };

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, plugin_port))?;
    serve(plugin, &listener, SocketAddr::from((Ipv4Addr::LOCALHOST, host_port)))
}

fn parse_port(value: &str) -> PluginResult<u16> {
    value.parse().map_err(|_| PluginError::Config(format!("Invalid port '{value}'")))
}

/// Accept one host connection on `listener` and answer its requests.
pub fn serve(plugin: &dyn Plugin, listener: &TcpListener, host_addr: SocketAddr) -> PluginResult<()> {
    let (stream, _) = listener.accept()?;
    stream.set_nodelay(true)?;

    let cli = CliConnection::new(host_addr);
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    while let Some(request) = read_message::<_, JsonRpcRequest>(&mut reader)? {
        let (result, finished) = match request.method.as_str() {
            methods::GET_METADATA => (
                serde_json::to_value(plugin.metadata())
                    .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string())),
                false,
            ),
            methods::RUN => (handle_run(plugin, &cli, &request), true),
            other => (Err(JsonRpcError::method_not_found(other)), false),
        };

        write_message(&mut writer, &JsonRpcResponse::from_result(request.id, result))?;
        if finished {
            break;
        }
    }

    Ok(())
}

fn handle_run(
    plugin: &dyn Plugin,
    cli: &CliConnection,
    request: &JsonRpcRequest,
) -> Result<Value, JsonRpcError> {
    let params: RunParams = request.params()?;

    let result = match catch_unwind(AssertUnwindSafe(|| plugin.run(cli, &params.args))) {
        Ok(Ok(())) => RunResult { ok: true, message: None },
        Ok(Err(message)) => RunResult { ok: false, message: Some(message) },
        Err(payload) => {
            return Err(JsonRpcError::new(
                PLUGIN_PANIC,
                format!("plugin panicked: {}", panic_message(payload.as_ref())),
            ))
        }
    };

    serde_json::to_value(result).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Connection back to the host's `Cli.*` services.
///
/// Connects on first use.
pub struct CliConnection {
    addr: SocketAddr,
    client: Mutex<Option<RpcClient>>,
}

impl CliConnection {
    /// Create a connection to the host listening on `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, client: Mutex::new(None) }
    }

    fn call<P, R>(&self, method: &str, params: &P) -> PluginResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut guard = self.client.lock();
        let client = match guard.take() {
            Some(client) => client,
            None => RpcClient::connect(self.addr)?,
        };
        guard.insert(client).call(method, params)
    }

    /// Run a host command, printing its output.
    pub fn cli_command(&self, args: &[&str]) -> PluginResult<Vec<String>> {
        self.call(methods::CLI_COMMAND, &command_params(args))
    }

    /// Run a host command without printing its output.
    pub fn cli_command_without_terminal_output(&self, args: &[&str]) -> PluginResult<Vec<String>> {
        self.call(methods::CLI_COMMAND_WITHOUT_TERMINAL_OUTPUT, &command_params(args))
    }

    /// Organization the user targets, if any.
    pub fn get_current_org(&self) -> PluginResult<Option<TargetRef>> {
        self.call(methods::GET_CURRENT_ORG, &())
    }

    /// Space the user targets, if any.
    pub fn get_current_space(&self) -> PluginResult<Option<TargetRef>> {
        self.call(methods::GET_CURRENT_SPACE, &())
    }

    /// Logged in user name.
    pub fn username(&self) -> PluginResult<Option<String>> {
        self.call(methods::USERNAME, &())
    }

    /// Logged in user GUID.
    pub fn user_guid(&self) -> PluginResult<Option<String>> {
        self.call(methods::USER_GUID, &())
    }

    /// Logged in user email.
    pub fn user_email(&self) -> PluginResult<Option<String>> {
        self.call(methods::USER_EMAIL, &())
    }

    /// Whether the user has an access token.
    pub fn is_logged_in(&self) -> PluginResult<bool> {
        self.call(methods::IS_LOGGED_IN, &())
    }

    /// Whether TLS validation against the API is skipped.
    pub fn is_ssl_disabled(&self) -> PluginResult<bool> {
        self.call(methods::IS_SSL_DISABLED, &())
    }

    /// Whether an API endpoint is set.
    pub fn has_api_endpoint(&self) -> PluginResult<bool> {
        self.call(methods::HAS_API_ENDPOINT, &())
    }

    /// The API endpoint URL.
    pub fn api_endpoint(&self) -> PluginResult<Option<String>> {
        self.call(methods::API_ENDPOINT, &())
    }

    /// The API version reported at login.
    pub fn api_version(&self) -> PluginResult<Option<String>> {
        self.call(methods::API_VERSION, &())
    }

    /// The OAuth access token.
    pub fn access_token(&self) -> PluginResult<Option<String>> {
        self.call(methods::ACCESS_TOKEN, &())
    }

    /// Whether an organization is targeted.
    pub fn has_organization(&self) -> PluginResult<bool> {
        self.call(methods::HAS_ORGANIZATION, &())
    }

    /// Whether a space is targeted.
    pub fn has_space(&self) -> PluginResult<bool> {
        self.call(methods::HAS_SPACE, &())
    }

    /// Look up an application in the targeted space.
    pub fn get_app(&self, name: &str) -> PluginResult<Value> {
        self.call(methods::GET_APP, &GetAppParams { name: name.to_string() })
    }

    /// Applications in the targeted space.
    pub fn get_apps(&self) -> PluginResult<Value> {
        self.call(methods::GET_APPS, &())
    }

    /// Organizations visible to the user.
    pub fn get_orgs(&self) -> PluginResult<Value> {
        self.call(methods::GET_ORGS, &())
    }

    /// Spaces in the targeted organization.
    pub fn get_spaces(&self) -> PluginResult<Value> {
        self.call(methods::GET_SPACES, &())
    }

    /// Service instances in the targeted space.
    pub fn get_services(&self) -> PluginResult<Value> {
        self.call(methods::GET_SERVICES, &())
    }
}

fn command_params(args: &[&str]) -> CliCommandParams {
    CliCommandParams { args: args.iter().map(|a| (*a).to_string()).collect() }
}
