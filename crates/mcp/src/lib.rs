//! MCP connection manager: a pool of child processes, each speaking JSON-RPC
//! over its own stdio, supervised with per-server state machines.
//!
//! Isolation is the load-bearing property — each server runs in its own
//! child, a crashing server never stalls its peers, and a timed-out call
//! rejects the caller without killing the child.

pub mod client;
pub mod error;
pub mod manager;
pub mod transport;
pub mod types;

pub use {
    client::McpClient,
    error::{McpError, Result},
    manager::{LaunchSpec, McpManager, QualifiedTool, ServerState, ServerStatus},
    types::{McpToolDef, ToolsCallResult},
};
