//! Blocking RPC client for one connection.

use std::io::{self, BufRead, BufReader};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::protocol::{write_message, JsonRpcRequest, JsonRpcResponse};
use crate::plugin::{PluginError, PluginResult};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Client side of an RPC connection. One request in flight at a time.
pub struct RpcClient {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    next_id: u64,
    pending: Vec<u8>,
}

impl RpcClient {
    /// Connect to `addr`.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    /// Keep trying to connect until `timeout` passes.
    ///
    /// `check` runs between attempts and can abort the wait, e.g. when the
    /// process that should be listening has already exited.
    pub fn connect_with_retry(
        addr: SocketAddr,
        timeout: Duration,
        mut check: impl FnMut() -> PluginResult<()>,
    ) -> PluginResult<Self> {
        let deadline = Instant::now() + timeout;

        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(Self::from_stream(stream)?),
                Err(e) if Instant::now() >= deadline => {
                    return Err(PluginError::Rpc(format!(
                        "Timed out connecting to {addr} after {}ms: {e}",
                        timeout.as_millis()
                    )))
                }
                Err(_) => {
                    check()?;
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
            }
        }
    }

    fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self { writer: stream, reader, next_id: 1, pending: Vec::new() })
    }

    /// Call `method` and block until the response arrives.
    pub fn call<P, R>(&mut self, method: &str, params: &P) -> PluginResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.writer.set_read_timeout(None)?;
        let id = self.send(method, params)?;
        let response = self.receive(id, None, || Ok(()))?;
        Self::decode(method, response)
    }

    /// Call `method`, running `poll` every `interval` while waiting.
    ///
    /// An error from `poll` abandons the call.
    pub fn call_polling<P, R>(
        &mut self,
        method: &str,
        params: &P,
        interval: Duration,
        poll: impl FnMut() -> PluginResult<()>,
    ) -> PluginResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.send(method, params)?;
        let response = self.receive(id, Some(interval), poll)?;
        self.writer.set_read_timeout(None)?;
        Self::decode(method, response)
    }

    /// Close both directions of the connection.
    pub fn close(&self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }

    fn send<P: Serialize + ?Sized>(&mut self, method: &str, params: &P) -> PluginResult<u64> {
        let id = self.next_id;
        self.next_id += 1;

        let params = serde_json::to_value(params)?;
        let params = if params.is_null() { None } else { Some(params) };
        let request = JsonRpcRequest::new(id, method, params);

        tracing::debug!(method, id, "RPC call");
        write_message(&mut self.writer, &request)
            .map_err(|e| PluginError::Rpc(format!("Failed to send {method}: {e}")))?;
        Ok(id)
    }

    fn receive(
        &mut self,
        id: u64,
        interval: Option<Duration>,
        mut poll: impl FnMut() -> PluginResult<()>,
    ) -> PluginResult<JsonRpcResponse> {
        self.writer.set_read_timeout(interval)?;
        self.pending.clear();

        loop {
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => return Err(PluginError::Rpc("connection closed by peer".to_string())),
                Ok(_) if self.pending.ends_with(b"\n") => {
                    if self.pending.iter().all(u8::is_ascii_whitespace) {
                        self.pending.clear();
                        continue;
                    }
                    let response: JsonRpcResponse = serde_json::from_slice(&self.pending)?;
                    self.pending.clear();

                    if response.id != id {
                        return Err(PluginError::Rpc(format!(
                            "Unexpected response id {} (expected {id})",
                            response.id
                        )));
                    }
                    return Ok(response);
                }
                Ok(_) => {}
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    poll()?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(PluginError::Rpc(format!("connection error: {e}"))),
            }
        }
    }

    fn decode<R: DeserializeOwned>(method: &str, response: JsonRpcResponse) -> PluginResult<R> {
        response.into_result().map_err(|e| PluginError::Rpc(format!("{method} failed: {}", e.message)))
    }
}
