//! RPC listener serving requests on background threads.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use super::protocol::{
    read_message, write_message, JsonRpcError, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR,
    PARSE_ERROR,
};
use crate::plugin::PluginResult;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long shutdown waits for in-flight requests to finish.
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(5);

/// Handles decoded requests.
pub trait RequestHandler: Send + Sync {
    /// Handle `method`, returning the JSON result or an RPC error.
    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Result<Value, JsonRpcError>;

    /// Called when the server stops, so long-running requests can bail out.
    fn shutdown(&self) {}
}

/// A local RPC listener.
///
/// The accept loop runs on its own thread and each connection is served on
/// a worker thread. [`RpcServer::shutdown`] (also run on drop) stops the
/// accept loop, interrupts the handler, closes every open connection and
/// waits a bounded time for the workers to finish.
pub struct RpcServer {
    addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Bind an ephemeral loopback port and start serving.
    pub fn bind(handler: Arc<dyn RequestHandler>) -> PluginResult<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        Self::start(listener, handler)
    }

    /// Start serving on an existing listener.
    pub fn start(listener: TcpListener, handler: Arc<dyn RequestHandler>) -> PluginResult<Self> {
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let connections = Arc::new(Mutex::new(Vec::new()));
        let workers = Arc::new(Mutex::new(Vec::new()));

        let accept_thread = {
            let shutdown = Arc::clone(&shutdown);
            let connections = Arc::clone(&connections);
            let workers = Arc::clone(&workers);
            let handler = Arc::clone(&handler);
            thread::Builder::new().name(format!("rpc-accept-{}", addr.port())).spawn(move || {
                accept_loop(&listener, &handler, &shutdown, &connections, &workers)
            })?
        };

        tracing::debug!(%addr, "RPC server listening");
        Ok(Self {
            addr,
            handler,
            shutdown,
            connections,
            workers,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address the server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the server listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting, close all connections and wait for the workers.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        self.handler.shutdown();

        for stream in self.connections.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }

        let _ = handle.join();
        self.join_workers();
        tracing::debug!(addr = %self.addr, "RPC server stopped");
    }

    fn join_workers(&self) {
        let deadline = Instant::now() + WORKER_JOIN_GRACE;
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();

        for worker in workers {
            while !worker.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                tracing::warn!(addr = %self.addr, "RPC worker still busy after shutdown");
            }
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: &TcpListener,
    handler: &Arc<dyn RequestHandler>,
    shutdown: &AtomicBool,
    connections: &Mutex<Vec<TcpStream>>,
    workers: &Mutex<Vec<JoinHandle<()>>>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => match spawn_worker(stream, Arc::clone(handler), connections) {
                Ok(worker) => {
                    let mut workers = workers.lock();
                    workers.retain(|w| !w.is_finished());
                    workers.push(worker);
                }
                Err(e) => tracing::warn!(%peer, error = %e, "Failed to serve RPC connection"),
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "RPC accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

fn spawn_worker(
    stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    connections: &Mutex<Vec<TcpStream>>,
) -> io::Result<JoinHandle<()>> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    connections.lock().push(stream.try_clone()?);

    thread::Builder::new().name("rpc-conn".to_string()).spawn(move || {
        if let Err(e) = serve_connection(stream, handler.as_ref()) {
            tracing::debug!(error = %e, "RPC connection closed with error");
        }
    })
}

/// Serve requests on one connection until EOF.
fn serve_connection(stream: TcpStream, handler: &dyn RequestHandler) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    loop {
        let request: JsonRpcRequest = match read_message(&mut reader) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                let error = JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}"));
                write_message(&mut writer, &JsonRpcResponse::failure(0, error))?;
                continue;
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(method = %request.method, id = request.id, "RPC request");

        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(&request.method, &request)))
            .unwrap_or_else(|_| {
                Err(JsonRpcError::new(
                    INTERNAL_ERROR,
                    format!("Handler for {} panicked", request.method),
                ))
            });

        write_message(&mut writer, &JsonRpcResponse::from_result(request.id, result))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::rpc::protocol::METHOD_NOT_FOUND;
    use std::io::BufReader;

    struct Echo;

    impl RequestHandler for Echo {
        fn handle(&self, method: &str, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
            match method {
                "Test.Echo" => Ok(request.params.clone().unwrap_or(Value::Null)),
                "Test.Panic" => panic!("boom"),
                other => Err(JsonRpcError::method_not_found(other)),
            }
        }
    }

    fn call(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>, id: u64, method: &str) -> JsonRpcResponse {
        let request = JsonRpcRequest::new(id, method, Some(serde_json::json!({"n": id})));
        write_message(stream, &request).unwrap();
        read_message(reader).unwrap().unwrap()
    }

    #[test]
    fn test_serves_requests_and_survives_handler_panic() {
        let server = RpcServer::bind(Arc::new(Echo)).unwrap();
        let mut stream = TcpStream::connect(server.addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let response = call(&mut stream, &mut reader, 1, "Test.Echo");
        assert_eq!(response.result, Some(serde_json::json!({"n": 1})));

        let response = call(&mut stream, &mut reader, 2, "Test.Panic");
        assert_eq!(response.error.unwrap().code, INTERNAL_ERROR);

        let response = call(&mut stream, &mut reader, 3, "Test.Missing");
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);

        let response = call(&mut stream, &mut reader, 4, "Test.Echo");
        assert!(response.is_success());
    }

    #[test]
    fn test_shutdown_closes_connections() {
        let mut server = RpcServer::bind(Arc::new(Echo)).unwrap();
        let stream = TcpStream::connect(server.addr()).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        // Give the accept loop a chance to register the connection.
        thread::sleep(Duration::from_millis(100));
        server.shutdown();

        let next: io::Result<Option<JsonRpcResponse>> = read_message(&mut reader);
        assert!(matches!(next, Ok(None) | Err(_)));
    }

    /// Blocks every request until the server shuts it down.
    #[derive(Default)]
    struct Stalls {
        stopped: AtomicBool,
        finished: AtomicBool,
    }

    impl RequestHandler for Stalls {
        fn handle(&self, _method: &str, _request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
            while !self.stopped.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
            }
            self.finished.store(true, Ordering::SeqCst);
            Err(JsonRpcError::new(INTERNAL_ERROR, "interrupted"))
        }

        fn shutdown(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_interrupts_handler_and_joins_workers() {
        let handler = Arc::new(Stalls::default());
        let mut server = RpcServer::bind(handler.clone()).unwrap();
        let mut stream = TcpStream::connect(server.addr()).unwrap();

        let request = JsonRpcRequest::new(1, "Test.Slow", None);
        write_message(&mut stream, &request).unwrap();
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        server.shutdown();

        assert!(handler.finished.load(Ordering::SeqCst));
        assert!(started.elapsed() < WORKER_JOIN_GRACE);
    }
}
