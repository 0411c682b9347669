//! Running plugin executables.
//!
//! Each invocation starts a fresh plugin process and walks it through
//! `Spawned -> MetadataNegotiated -> Running -> Completed | Faulted`, ending
//! in `TornDown` on every path. The plugin is started as
//! `plugin_exe <plugin_port> <host_port>`: it serves `Plugin.*` on the first
//! port and calls `Cli.*` back on the second.

use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::client::RpcClient;
use super::protocol::{methods, RunParams, RunResult};
use super::server::RpcServer;
use crate::core::RpcConfig;
use crate::plugin::capabilities::{CapabilityHandler, CliCapabilities};
use crate::plugin::{
    InstalledPlugin, PluginError, PluginMetadata, PluginResult, PLUGIN_PROTOCOL_VERSION,
    UNINSTALL_ARG,
};

/// How often a running command checks for cancellation.
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long a plugin may take to exit after answering `Plugin.Run`.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Shared flag used to interrupt a running plugin.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of one plugin invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Spawned,
    MetadataNegotiated,
    Running,
    Completed,
    Faulted,
    TornDown,
}

/// A child plugin process, killed when dropped.
struct PluginProcess {
    name: String,
    child: Child,
}

impl PluginProcess {
    fn spawn(name: &str, path: &Path, plugin_port: u16, host_port: u16) -> PluginResult<Self> {
        let child = Command::new(path)
            .arg(plugin_port.to_string())
            .arg(host_port.to_string())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PluginError::RuntimeFault {
                plugin: name.to_string(),
                reason: format!("failed to start {}: {e}", path.display()),
            })?;

        tracing::debug!(plugin = name, pid = child.id(), plugin_port, host_port, "Plugin spawned");
        Ok(Self { name: name.to_string(), child })
    }

    /// Error if the process has already exited.
    fn ensure_running(&mut self, stage: &str) -> PluginResult<()> {
        match self.child.try_wait()? {
            Some(status) => Err(self.fault(format!("exited before {stage} ({status})"))),
            None => Ok(()),
        }
    }

    /// Wait up to `grace` for the process to exit on its own.
    fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                _ => return None,
            }
        }
    }

    fn fault(&self, reason: impl Into<String>) -> PluginError {
        PluginError::RuntimeFault { plugin: self.name.clone(), reason: reason.into() }
    }
}

impl Drop for PluginProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// An open connection to a running plugin.
///
/// Field order is teardown order: the connection closes first, then the
/// process is reaped, then the capability server stops.
struct Session {
    client: RpcClient,
    process: PluginProcess,
    _server: RpcServer,
    state: InvocationState,
}

impl Session {
    fn transition(&mut self, state: InvocationState) {
        tracing::debug!(plugin = %self.process.name, from = ?self.state, to = ?state, "Plugin state");
        self.state = state;
    }

    /// Ask the plugin for its metadata.
    ///
    /// Gives up when `cancel` is set, when the process dies, or after `timeout`.
    fn negotiate(
        &mut self,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> PluginResult<PluginMetadata> {
        let result = self.request_metadata(cancel, timeout);
        match &result {
            Ok(_) => self.transition(InvocationState::MetadataNegotiated),
            Err(_) => self.transition(InvocationState::Faulted),
        }
        result
    }

    fn request_metadata(
        &mut self,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> PluginResult<PluginMetadata> {
        let deadline = Instant::now() + timeout;
        let Self { client, process, .. } = self;

        let response: PluginResult<PluginMetadata> =
            client.call_polling(methods::GET_METADATA, &(), RUN_POLL_INTERVAL, || {
                if cancel.is_cancelled() {
                    return Err(PluginError::Cancelled(process.name.clone()));
                }
                process.ensure_running("answering metadata")?;
                if Instant::now() >= deadline {
                    return Err(process.fault(format!(
                        "no metadata received within {}ms",
                        timeout.as_millis()
                    )));
                }
                Ok(())
            });

        let metadata = match response {
            Ok(metadata) => metadata,
            Err(e @ (PluginError::Cancelled(_) | PluginError::RuntimeFault { .. })) => return Err(e),
            Err(_) if cancel.is_cancelled() => {
                return Err(PluginError::Cancelled(process.name.clone()))
            }
            Err(e) => return Err(process.fault(format!("metadata negotiation failed: {e}"))),
        };

        if metadata.protocol_version != PLUGIN_PROTOCOL_VERSION {
            return Err(PluginError::Incompatible {
                name: metadata.name,
                required: format!("plugin protocol v{}", metadata.protocol_version),
                available: format!("plugin protocol v{PLUGIN_PROTOCOL_VERSION}"),
            });
        }
        Ok(metadata)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.client.close();
        self.transition(InvocationState::TornDown);
    }
}

/// Starts plugin processes and talks to them.
pub struct PluginRuntime {
    capabilities: Arc<dyn CliCapabilities>,
    connect_timeout: Duration,
    metadata_timeout: Duration,
}

impl PluginRuntime {
    /// Create a runtime serving `capabilities` to plugins.
    pub fn new(capabilities: Arc<dyn CliCapabilities>, rpc: &RpcConfig) -> Self {
        Self {
            capabilities,
            connect_timeout: rpc.connect_timeout(),
            metadata_timeout: rpc.metadata_timeout(),
        }
    }

    /// Start the plugin at `path` and ask it for its metadata.
    pub fn fetch_metadata(&self, path: &Path) -> PluginResult<PluginMetadata> {
        let name = path.file_stem().map_or_else(
            || path.display().to_string(),
            |stem| stem.to_string_lossy().into_owned(),
        );

        let cancel = CancelToken::new();
        let mut session = self.open(&name, path, &cancel)?;
        session.negotiate(&cancel, self.metadata_timeout)
    }

    /// Run a plugin command.
    ///
    /// `args[0]` is the command name, the rest are its arguments. Blocks
    /// until the plugin answers, faults, or `cancel` is set.
    pub fn run(
        &self,
        plugin: &InstalledPlugin,
        args: Vec<String>,
        cancel: &CancelToken,
    ) -> PluginResult<()> {
        let mut session = self.open(&plugin.name, &plugin.executable_path, cancel)?;
        let metadata = session.negotiate(cancel, self.metadata_timeout)?;

        if let Some(command) = args.first().filter(|c| c.as_str() != UNINSTALL_ARG) {
            if !metadata.commands.iter().any(|c| c.matches(command)) {
                session.transition(InvocationState::Faulted);
                return Err(session
                    .process
                    .fault(format!("plugin no longer provides command '{command}'")));
            }
        }

        session.transition(InvocationState::Running);
        let result = self.run_command(&mut session, args, cancel);
        session.transition(match result {
            Ok(()) => InvocationState::Completed,
            Err(_) => InvocationState::Faulted,
        });
        result
    }

    fn run_command(
        &self,
        session: &mut Session,
        args: Vec<String>,
        cancel: &CancelToken,
    ) -> PluginResult<()> {
        let name = session.process.name.clone();
        let params = RunParams { args };

        let response: PluginResult<RunResult> =
            session.client.call_polling(methods::RUN, &params, RUN_POLL_INTERVAL, || {
                if cancel.is_cancelled() {
                    Err(PluginError::Cancelled(name.clone()))
                } else {
                    Ok(())
                }
            });

        match response {
            Ok(RunResult { ok: true, .. }) => {
                session.client.close();
                match session.process.wait_for_exit(EXIT_GRACE) {
                    Some(status) if !status.success() => {
                        Err(session.process.fault(format!("exited with {status}")))
                    }
                    _ => Ok(()),
                }
            }
            Ok(RunResult { ok: false, message }) => Err(session
                .process
                .fault(message.unwrap_or_else(|| "command reported failure".to_string()))),
            Err(PluginError::Cancelled(_)) => {
                tracing::info!(plugin = %name, "Plugin interrupted");
                Err(PluginError::Cancelled(name))
            }
            // The interrupt usually reaches the plugin too and closes the connection first.
            Err(_) if cancel.is_cancelled() => Err(PluginError::Cancelled(name)),
            Err(e) => {
                let reason = match session.process.wait_for_exit(Duration::from_millis(200)) {
                    Some(status) => format!("{e} ({status})"),
                    None => e.to_string(),
                };
                Err(session.process.fault(reason))
            }
        }
    }

    fn open(&self, name: &str, path: &Path, cancel: &CancelToken) -> PluginResult<Session> {
        let handler = Arc::new(CapabilityHandler::new(Arc::clone(&self.capabilities)));
        let server = RpcServer::bind(handler)?;
        let plugin_port = reserve_port()?;

        let mut process = PluginProcess::spawn(name, path, plugin_port, server.port())?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, plugin_port));

        let client = RpcClient::connect_with_retry(addr, self.connect_timeout, || {
            if cancel.is_cancelled() {
                return Err(PluginError::Cancelled(name.to_string()));
            }
            process.ensure_running("accepting connections")
        })
        .map_err(|e| match e {
            PluginError::Rpc(reason) => process.fault(reason),
            other => other,
        })?;

        Ok(Session { client, process, _server: server, state: InvocationState::Spawned })
    }
}

/// Pick a free loopback port for the plugin to bind.
fn reserve_port() -> PluginResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
