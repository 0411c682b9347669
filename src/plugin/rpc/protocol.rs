//! Wire types for the host/plugin RPC channel.
//!
//! Messages are JSON-RPC 2.0 objects, one per line, exchanged over local
//! TCP connections. The host calls `Plugin.*` methods on the plugin; the
//! plugin calls `Cli.*` methods back on the host.

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal error while handling the request.
pub const INTERNAL_ERROR: i32 = -32603;
/// The plugin panicked while handling the request.
pub const PLUGIN_PANIC: i32 = -32000;
/// A host capability returned an error.
pub const CAPABILITY_ERROR: i32 = -32001;

/// Method names.
pub mod methods {
    pub const GET_METADATA: &str = "Plugin.GetMetadata";
    pub const RUN: &str = "Plugin.Run";

    pub const CLI_COMMAND: &str = "Cli.CliCommand";
    pub const CLI_COMMAND_WITHOUT_TERMINAL_OUTPUT: &str = "Cli.CliCommandWithoutTerminalOutput";
    pub const GET_CURRENT_ORG: &str = "Cli.GetCurrentOrg";
    pub const GET_CURRENT_SPACE: &str = "Cli.GetCurrentSpace";
    pub const USERNAME: &str = "Cli.Username";
    pub const USER_GUID: &str = "Cli.UserGuid";
    pub const USER_EMAIL: &str = "Cli.UserEmail";
    pub const IS_LOGGED_IN: &str = "Cli.IsLoggedIn";
    pub const IS_SSL_DISABLED: &str = "Cli.IsSslDisabled";
    pub const HAS_API_ENDPOINT: &str = "Cli.HasApiEndpoint";
    pub const API_ENDPOINT: &str = "Cli.ApiEndpoint";
    pub const API_VERSION: &str = "Cli.ApiVersion";
    pub const ACCESS_TOKEN: &str = "Cli.AccessToken";
    pub const HAS_ORGANIZATION: &str = "Cli.HasOrganization";
    pub const HAS_SPACE: &str = "Cli.HasSpace";
    pub const GET_APP: &str = "Cli.GetApp";
    pub const GET_APPS: &str = "Cli.GetApps";
    pub const GET_ORGS: &str = "Cli.GetOrgs";
    pub const GET_SPACES: &str = "Cli.GetSpaces";
    pub const GET_SERVICES: &str = "Cli.GetServices";
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: u64,
    /// Method name
    pub method: String,
    /// Parameters (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, method: method.into(), params }
    }

    /// Decode the params, treating missing params as `null`.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, JsonRpcError> {
        serde_json::from_value(self.params.clone().unwrap_or(Value::Null))
            .map_err(|e| JsonRpcError::new(INVALID_PARAMS, format!("Invalid params: {e}")))
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Request ID
    pub id: u64,
    /// Result (if successful)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (if failed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response.
    pub fn success(id: u64, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    /// Error response.
    pub fn failure(id: u64, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(error) }
    }

    /// Response to `id` built from a handler result.
    pub fn from_result(id: u64, result: Result<Value, JsonRpcError>) -> Self {
        match result {
            Ok(value) => Self::success(id, value),
            Err(error) => Self::failure(id, error),
        }
    }

    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Get the result value.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, JsonRpcError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        serde_json::from_value(self.result.unwrap_or(Value::Null)).map_err(|e| {
            JsonRpcError::new(INTERNAL_ERROR, format!("Failed to parse result: {}", e))
        })
    }
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error without data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    /// Unknown method.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

/// Parameters of `Plugin.Run`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunParams {
    /// Command name followed by its arguments
    pub args: Vec<String>,
}

/// Result of `Plugin.Run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Whether the command succeeded
    pub ok: bool,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parameters of `Cli.CliCommand` and `Cli.CliCommandWithoutTerminalOutput`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliCommandParams {
    /// Arguments passed to the host CLI
    pub args: Vec<String>,
}

/// Parameters of `Cli.GetApp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppParams {
    /// Application name
    pub name: String,
}

/// Write one message followed by a newline.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

/// Read one newline-terminated message. `Ok(None)` on a clean EOF.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> io::Result<Option<T>> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }

    serde_json::from_slice(&line).map(Some).map_err(io::Error::from)
}
