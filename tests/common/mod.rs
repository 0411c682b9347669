//! Shared helpers for integration tests.
//!
//! `TestServer` is a minimal HTTP/1.1 server on a loopback port that answers
//! GET requests from a route table. It stands in for plugin repositories and
//! binary download hosts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cloudctl::core::TargetRef;
use cloudctl::plugin::{current_platform, CloudApi, Platform, PluginResult};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};

/// Path of the reference plugin built alongside the tests.
pub const ECHO_PLUGIN: &str = env!("CARGO_BIN_EXE_echo-plugin");

// ============================================================================
// HTTP test server
// ============================================================================

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(value: &Value) -> Self {
        Self::bytes(value.to_string().into_bytes())
            .with_header("Content-Type", "application/json")
    }

    pub fn text(body: &str) -> Self {
        Self::bytes(body.as_bytes().to_vec())
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self { status: 200, headers: Vec::new(), body }
    }

    pub fn status(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn redirect(location: &str) -> Self {
        Self::status(302).with_header("Location", location)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Routes = Arc<Mutex<HashMap<String, Response>>>;

/// Loopback HTTP server serving a mutable route table.
pub struct TestServer {
    addr: SocketAddr,
    routes: Routes,
    hits: Arc<Mutex<Vec<String>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let routes: Routes = Arc::default();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let routes = Arc::clone(&routes);
            let hits = Arc::clone(&hits);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let routes = Arc::clone(&routes);
                            let hits = Arc::clone(&hits);
                            thread::spawn(move || serve(stream, &routes, &hits));
                        }
                        Err(_) => thread::sleep(Duration::from_millis(5)),
                    }
                }
            })
        };

        Self { addr, routes, hits, shutdown, handle: Some(handle) }
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Serve `response` for GET `path` (query string ignored).
    pub fn route(&self, path: &str, response: Response) {
        self.routes.lock().unwrap().insert(path.to_string(), response);
    }

    /// Paths requested so far.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve(stream: TcpStream, routes: &Routes, hits: &Mutex<Vec<String>>) {
    stream.set_nonblocking(false).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => {}
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    hits.lock().unwrap().push(path.clone());

    let response = routes
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or_else(|| Response::status(404));

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let mut stream = stream;
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&response.body);
    let _ = stream.flush();
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Lowercase hex SHA-1 of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    Sha1::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

/// The platform of this machine.
pub fn this_platform() -> Platform {
    current_platform().expect("tests need a supported platform")
}

/// Some platform other than this machine's.
pub fn other_platform() -> Platform {
    if this_platform() == Platform::Win32 {
        Platform::Osx
    } else {
        Platform::Win32
    }
}

/// A `/list` body with one plugin published for `platform`.
pub fn listing(name: &str, platform: Platform, url: &str, checksum: &str) -> Value {
    json!({
        "plugins": [{
            "name": name,
            "description": "A test plugin",
            "version": "1.2.3",
            "binaries": [{"platform": platform.as_str(), "url": url, "checksum": checksum}]
        }]
    })
}

/// API stub answering from a fixed path table.
#[derive(Default)]
pub struct StubApi {
    pub responses: HashMap<String, Value>,
}

impl CloudApi for StubApi {
    fn get(&self, path: &str, _query: &[(&str, &str)]) -> PluginResult<Value> {
        Ok(self.responses.get(path).cloned().unwrap_or(Value::Null))
    }
}

/// An org reference for session fixtures.
pub fn org(name: &str) -> TargetRef {
    TargetRef { guid: format!("{name}-guid"), name: name.to_string() }
}
