//! Stdio transport: spawn a server child process and exchange line-delimited
//! JSON-RPC over its stdin/stdout.
//!
//! Writes are serialized through a mutex, so requests hit the child in FIFO
//! order; responses are matched back to callers through a pending map keyed
//! by JSON-RPC id and may complete out of order. A request timeout rejects
//! the caller's future and forgets the id — the child is left running.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, Command},
        sync::{Mutex, oneshot},
    },
    tracing::{debug, trace, warn},
};

use crate::{
    error::{McpError, Result},
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse},
};

/// Per-request wall clock. Callers are rejected after this; the child keeps
/// whatever it was doing.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioTransport {
    server_id: String,
    child: Mutex<Child>,
    stdin: Mutex<tokio::process::ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    reader_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pid: Option<u32>,
}

impl StdioTransport {
    /// Spawn the server process and start the stdout/stderr reader tasks.
    pub async fn spawn(
        server_id: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>> {
        debug!(server = %server_id, command = %command, args = ?args, "spawning MCP server child");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::ConnectionFailed {
            server: server_id.to_string(),
            message: format!("failed to spawn '{command}': {e}"),
        })?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| McpError::Protocol(
            "child stdin not captured".into(),
        ))?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Protocol(
            "child stdout not captured".into(),
        ))?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let transport = Arc::new(Self {
            server_id: server_id.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending: Arc::clone(&pending),
            next_id: AtomicU64::new(1),
            reader_handle: Mutex::new(None),
            pid,
        });

        // Drain stderr into the log so server complaints are visible.
        if let Some(stderr) = stderr {
            let server = server_id.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                warn!(server = %server, stderr = %trimmed, "MCP server stderr");
                            }
                        },
                    }
                }
            });
        }

        let server = server_id.to_string();
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(server = %server, "MCP server stdout closed");
                        break;
                    },
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(server = %server, raw = %trimmed, "MCP server -> client");

                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(resp) => {
                                let key = resp.id.to_string();
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&key) {
                                    let _ = tx.send(resp);
                                } else {
                                    // Either a timed-out request's late answer
                                    // or a server-initiated notification.
                                    debug!(server = %server, id = %key, "response with no waiting caller");
                                }
                            },
                            Err(e) => {
                                trace!(server = %server, error = %e, "non-response line from server");
                            },
                        }
                    },
                    Err(e) => {
                        warn!(server = %server, error = %e, "error reading MCP server stdout");
                        break;
                    },
                }
            }
        });

        *transport.reader_handle.lock().await = Some(handle);
        Ok(transport)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Issue a request and await its correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);
        let id_key = req.id.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id_key.clone(), tx);

        let mut payload = serde_json::to_string(&req)
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        payload.push('\n');

        trace!(server = %self.server_id, method = %method, id, "client -> MCP server");

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(payload.as_bytes()).await?;
            stdin.flush().await?;
        }

        let resp = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => {
                return Err(McpError::NotConnected(self.server_id.clone()));
            },
            Err(_) => {
                // Forget the id; a late reply is dropped by the reader.
                self.pending.lock().await.remove(&id_key);
                return Err(McpError::Timeout {
                    method: method.to_string(),
                    seconds: REQUEST_TIMEOUT.as_secs(),
                });
            },
        };

        if let Some(err) = resp.error {
            return Err(McpError::Server {
                code: err.code,
                message: err.message,
            });
        }

        Ok(resp)
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let notif = JsonRpcNotification {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
        };

        let mut payload = serde_json::to_string(&notif)
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        payload.push('\n');

        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    pub async fn kill(&self) {
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }
}
