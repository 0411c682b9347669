//! Host/plugin RPC: wire protocol, both endpoints, and the process runtime.

mod client;
pub mod protocol;
mod runtime;
mod server;

pub use client::RpcClient;
pub use runtime::{CancelToken, InvocationState, PluginRuntime};
pub use server::{RequestHandler, RpcServer};
