//! Host capabilities exposed to running plugins.
//!
//! A plugin reaches back into the host through the `Cli.*` RPC methods.
//! [`CapabilityHandler`] decodes those calls and forwards them to a
//! [`CliCapabilities`] implementation; [`SessionCapabilities`] is the one
//! the CLI uses, backed by the saved login session and the cloud API.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use super::rpc::protocol::{
    methods, CliCommandParams, GetAppParams, JsonRpcError, JsonRpcRequest, CAPABILITY_ERROR,
    INTERNAL_ERROR,
};
use super::rpc::RequestHandler;
use super::{PluginError, PluginResult};
use crate::core::{normalize_repo_url, HttpConfig, SessionConfig, TargetRef};

/// Services the host offers to plugins.
pub trait CliCapabilities: Send + Sync {
    /// Run a host CLI command, returning its output lines and echoing them.
    fn cli_command(&self, args: &[String]) -> PluginResult<Vec<String>>;

    /// Run a host CLI command, returning its output lines silently.
    fn cli_command_without_terminal_output(&self, args: &[String]) -> PluginResult<Vec<String>>;

    /// Targeted organization.
    fn current_org(&self) -> Option<TargetRef>;

    /// Targeted space.
    fn current_space(&self) -> Option<TargetRef>;

    /// Logged in user name.
    fn username(&self) -> Option<String>;

    /// Logged in user GUID.
    fn user_guid(&self) -> Option<String>;

    /// Logged in user email.
    fn user_email(&self) -> Option<String>;

    /// Whether a user is logged in.
    fn is_logged_in(&self) -> bool;

    /// Whether TLS validation against the API is disabled.
    fn is_ssl_disabled(&self) -> bool;

    /// API endpoint.
    fn api_endpoint(&self) -> Option<String>;

    /// API version.
    fn api_version(&self) -> Option<String>;

    /// OAuth access token.
    fn access_token(&self) -> Option<String>;

    /// One application in the targeted space.
    fn get_app(&self, name: &str) -> PluginResult<Value>;

    /// Applications in the targeted space.
    fn get_apps(&self) -> PluginResult<Value>;

    /// Organizations visible to the user.
    fn get_orgs(&self) -> PluginResult<Value>;

    /// Spaces in the targeted organization.
    fn get_spaces(&self) -> PluginResult<Value>;

    /// Service instances in the targeted space.
    fn get_services(&self) -> PluginResult<Value>;

    /// Stop any work still running for a plugin that is going away.
    fn interrupt(&self) {}
}

/// Routes `Cli.*` requests to a [`CliCapabilities`] implementation.
pub struct CapabilityHandler {
    capabilities: Arc<dyn CliCapabilities>,
}

impl CapabilityHandler {
    /// Create a handler over `capabilities`.
    pub fn new(capabilities: Arc<dyn CliCapabilities>) -> Self {
        Self { capabilities }
    }
}

impl RequestHandler for CapabilityHandler {
    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let caps = self.capabilities.as_ref();

        match method {
            methods::CLI_COMMAND => {
                let params: CliCommandParams = request.params()?;
                reply(caps.cli_command(&params.args))
            }
            methods::CLI_COMMAND_WITHOUT_TERMINAL_OUTPUT => {
                let params: CliCommandParams = request.params()?;
                reply(caps.cli_command_without_terminal_output(&params.args))
            }
            methods::GET_CURRENT_ORG => reply(Ok(caps.current_org())),
            methods::GET_CURRENT_SPACE => reply(Ok(caps.current_space())),
            methods::HAS_ORGANIZATION => Ok(Value::Bool(caps.current_org().is_some())),
            methods::HAS_SPACE => Ok(Value::Bool(caps.current_space().is_some())),
            methods::USERNAME => reply(Ok(caps.username())),
            methods::USER_GUID => reply(Ok(caps.user_guid())),
            methods::USER_EMAIL => reply(Ok(caps.user_email())),
            methods::IS_LOGGED_IN => Ok(Value::Bool(caps.is_logged_in())),
            methods::IS_SSL_DISABLED => Ok(Value::Bool(caps.is_ssl_disabled())),
            methods::HAS_API_ENDPOINT => {
                Ok(Value::Bool(caps.api_endpoint().is_some_and(|e| !e.is_empty())))
            }
            methods::API_ENDPOINT => reply(Ok(caps.api_endpoint())),
            methods::API_VERSION => reply(Ok(caps.api_version())),
            methods::ACCESS_TOKEN => reply(Ok(caps.access_token())),
            methods::GET_APP => {
                let params: GetAppParams = request.params()?;
                reply(caps.get_app(&params.name))
            }
            methods::GET_APPS => reply(caps.get_apps()),
            methods::GET_ORGS => reply(caps.get_orgs()),
            methods::GET_SPACES => reply(caps.get_spaces()),
            methods::GET_SERVICES => reply(caps.get_services()),
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn shutdown(&self) {
        self.capabilities.interrupt();
    }
}

fn reply<T: Serialize>(result: PluginResult<T>) -> Result<Value, JsonRpcError> {
    let value = result.map_err(|e| JsonRpcError::new(CAPABILITY_ERROR, e.to_string()))?;
    serde_json::to_value(value).map_err(|e| JsonRpcError::new(INTERNAL_ERROR, e.to_string()))
}

/// Read access to the cloud API.
pub trait CloudApi: Send + Sync {
    /// `GET path?query` against the API, returning the JSON body.
    fn get(&self, path: &str, query: &[(&str, &str)]) -> PluginResult<Value>;
}

/// [`CloudApi`] over HTTP using the session's endpoint and token.
pub struct HttpCloudApi {
    client: reqwest::blocking::Client,
    endpoint: Option<String>,
    access_token: Option<String>,
}

impl HttpCloudApi {
    /// Create a client for the session's API endpoint.
    pub fn new(session: &SessionConfig, http: &HttpConfig) -> PluginResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(http.timeout())
            .user_agent(format!("cloudctl/{}", env!("CARGO_PKG_VERSION")))
            .danger_accept_invalid_certs(session.skip_ssl_validation)
            .build()?;

        Ok(Self {
            client,
            endpoint: session.api_endpoint.clone(),
            access_token: session.access_token.clone(),
        })
    }
}

impl CloudApi for HttpCloudApi {
    fn get(&self, path: &str, query: &[(&str, &str)]) -> PluginResult<Value> {
        let endpoint = self
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| PluginError::Capability("No API endpoint set".to_string()))?;
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| PluginError::Capability("Not logged in".to_string()))?;
        let token = token.strip_prefix("bearer ").unwrap_or(token);

        let url = format!("{}{path}", normalize_repo_url(endpoint));
        tracing::debug!(url, "Cloud API request");

        let response = self.client.get(&url).query(query).bearer_auth(token).send()?;
        if !response.status().is_success() {
            return Err(PluginError::Capability(format!(
                "GET {path} failed: HTTP {}",
                response.status()
            )));
        }

        Ok(response.json()?)
    }
}

/// API stand-in answering every request with `null`.
#[cfg(test)]
pub(crate) struct NullApi;

#[cfg(test)]
impl CloudApi for NullApi {
    fn get(&self, _path: &str, _query: &[(&str, &str)]) -> PluginResult<Value> {
        Ok(Value::Null)
    }
}

/// How often a `CliCommand` callback checks on its host process.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long an interrupted host command gets to exit before it is killed.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Capabilities backed by the saved session.
///
/// Host commands started for `Cli.CliCommand*` are tracked until they exit,
/// so [`CliCapabilities::interrupt`] can stop them when the plugin is torn down.
pub struct SessionCapabilities {
    session: SessionConfig,
    api: Arc<dyn CloudApi>,
    executable: PathBuf,
    children: Mutex<HashMap<u32, Child>>,
}

impl SessionCapabilities {
    /// Create capabilities for `session`.
    ///
    /// Host CLI commands requested by plugins re-run the current executable.
    pub fn new(session: SessionConfig, api: Arc<dyn CloudApi>) -> Self {
        let executable = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("cloudctl"));
        Self { session, api, executable, children: Mutex::new(HashMap::new()) }
    }

    /// Run host CLI commands with a different executable.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    fn run_host(&self, args: &[String], echo: bool) -> PluginResult<Vec<String>> {
        tracing::debug!(?args, "Plugin requested host command");

        let mut child = Command::new(&self.executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PluginError::Capability(format!("Failed to run host command: {e}")))?;

        let stdout = child.stdout.take();
        let reader = thread::spawn(move || {
            let Some(stdout) = stdout else {
                return Vec::new();
            };
            BufReader::new(stdout)
                .lines()
                .map_while(Result::ok)
                .inspect(|line| {
                    if echo {
                        println!("{line}");
                    }
                })
                .collect::<Vec<String>>()
        });

        let pid = child.id();
        self.children.lock().insert(pid, child);

        let status = loop {
            {
                let mut children = self.children.lock();
                let Some(child) = children.get_mut(&pid) else {
                    return Err(PluginError::Capability(format!(
                        "'{}' was interrupted",
                        args.join(" ")
                    )));
                };
                if let Some(status) = child.try_wait()? {
                    children.remove(&pid);
                    break status;
                }
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        };

        let lines = reader.join().unwrap_or_default();

        if !status.success() {
            return Err(PluginError::Capability(format!(
                "'{}' failed with {status}",
                args.join(" ")
            )));
        }

        Ok(lines)
    }

    fn space(&self) -> PluginResult<&TargetRef> {
        self.session
            .space
            .as_ref()
            .ok_or_else(|| PluginError::Capability("No space targeted".to_string()))
    }

    fn org(&self) -> PluginResult<&TargetRef> {
        self.session
            .org
            .as_ref()
            .ok_or_else(|| PluginError::Capability("No org targeted".to_string()))
    }
}

/// The `resources` array of a paginated API response.
fn resources(body: Value) -> Value {
    match body {
        Value::Object(mut map) => map.remove("resources").unwrap_or(Value::Array(Vec::new())),
        other => other,
    }
}

impl CliCapabilities for SessionCapabilities {
    fn cli_command(&self, args: &[String]) -> PluginResult<Vec<String>> {
        self.run_host(args, true)
    }

    fn cli_command_without_terminal_output(&self, args: &[String]) -> PluginResult<Vec<String>> {
        self.run_host(args, false)
    }

    fn current_org(&self) -> Option<TargetRef> {
        self.session.org.clone()
    }

    fn current_space(&self) -> Option<TargetRef> {
        self.session.space.clone()
    }

    fn username(&self) -> Option<String> {
        self.session.username.clone()
    }

    fn user_guid(&self) -> Option<String> {
        self.session.user_guid.clone()
    }

    fn user_email(&self) -> Option<String> {
        self.session.user_email.clone()
    }

    fn is_logged_in(&self) -> bool {
        self.session.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn is_ssl_disabled(&self) -> bool {
        self.session.skip_ssl_validation
    }

    fn api_endpoint(&self) -> Option<String> {
        self.session.api_endpoint.clone()
    }

    fn api_version(&self) -> Option<String> {
        self.session.api_version.clone()
    }

    fn access_token(&self) -> Option<String> {
        self.session.access_token.clone()
    }

    fn get_app(&self, name: &str) -> PluginResult<Value> {
        let space = self.space()?;
        let body =
            self.api.get("/v3/apps", &[("names", name), ("space_guids", space.guid.as_str())])?;

        match resources(body) {
            Value::Array(mut apps) if !apps.is_empty() => Ok(apps.swap_remove(0)),
            _ => Err(PluginError::Capability(format!("App {name} not found"))),
        }
    }

    fn get_apps(&self) -> PluginResult<Value> {
        let space = self.space()?;
        Ok(resources(self.api.get("/v3/apps", &[("space_guids", space.guid.as_str())])?))
    }

    fn get_orgs(&self) -> PluginResult<Value> {
        Ok(resources(self.api.get("/v3/organizations", &[])?))
    }

    fn get_spaces(&self) -> PluginResult<Value> {
        let org = self.org()?;
        Ok(resources(self.api.get("/v3/spaces", &[("organization_guids", org.guid.as_str())])?))
    }

    fn get_services(&self) -> PluginResult<Value> {
        let space = self.space()?;
        Ok(resources(
            self.api.get("/v3/service_instances", &[("space_guids", space.guid.as_str())])?,
        ))
    }

    fn interrupt(&self) {
        let children: Vec<Child> = self.children.lock().drain().map(|(_, child)| child).collect();
        for mut child in children {
            tracing::debug!(pid = child.id(), "Stopping host command");
            stop_child(&mut child, CHILD_EXIT_GRACE);
        }
    }
}

/// Ask `child` to stop, kill it after `grace`, and reap it.
fn stop_child(child: &mut Child, grace: Duration) {
    if send_interrupt(child) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
                Err(_) => break,
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn send_interrupt(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    i32::try_from(child.id()).is_ok_and(|pid| kill(Pid::from_raw(pid), Signal::SIGINT).is_ok())
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) -> bool {
    false
}
