//! Subprocess adapter.
//!
//! Wraps a child process that speaks a line-oriented JSON request/response
//! protocol on its standard I/O. Each request carries a monotonically
//! increasing id; a background reader task matches response lines back to
//! their waiting callers. Process exit fails all in-flight requests and
//! marks the adapter disconnected; `reconnect` re-spawns.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::error::{AdapterError, Result};
use crate::in_process::normalize_outcome;
use crate::traits::{
    Adapter, ProviderDescriptor, ResourceContent, ResourceDescriptor, ToolDescriptor, ToolOutcome,
};

/// A matched response line: either the result payload or a protocol-level
/// error reported by the child. Transport death is signaled by dropping the
/// sender instead.
enum WireReply {
    Result(Value),
    Error(String),
}

type PendingMap = Arc<DashMap<u64, oneshot::Sender<WireReply>>>;

/// Live state of a spawned child.
struct ProcessState {
    child: Child,
    stdin: ChildStdin,
    alive: Arc<AtomicBool>,
}

/// Adapter over a child process speaking line-oriented JSON.
pub struct SubprocessAdapter {
    descriptor: ProviderDescriptor,
    workdir: PathBuf,
    env: HashMap<String, String>,
    next_id: AtomicU64,
    pending: PendingMap,
    state: Mutex<Option<ProcessState>>,
}

impl SubprocessAdapter {
    /// Build an adapter for `descriptor`, to be spawned in `workdir` with
    /// `env` merged into the child environment. Construction does not
    /// spawn; call [`Adapter::connect`].
    pub fn new(
        descriptor: ProviderDescriptor,
        workdir: PathBuf,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            descriptor,
            workdir,
            env,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            state: Mutex::new(None),
        }
    }

    fn transient(&self, reason: impl Into<String>) -> AdapterError {
        AdapterError::Transient {
            provider: self.descriptor.key.clone(),
            reason: reason.into(),
        }
    }

    /// Spawn the child and wire up the reader task.
    async fn spawn(&self) -> Result<ProcessState> {
        let (program, args) = self
            .descriptor
            .command
            .split_first()
            .ok_or_else(|| AdapterError::Fatal {
                provider: self.descriptor.key.clone(),
                reason: "provider descriptor has no command".into(),
            })?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.transient(format!("spawn `{program}` failed: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.transient("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.transient("child stdout unavailable"))?;

        // Forward child stderr into our logs.
        if let Some(stderr) = child.stderr.take() {
            let key = self.descriptor.key.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(provider = %key, line = %line, "adapter stderr");
                }
            });
        }

        let alive = Arc::new(AtomicBool::new(true));
        let reader_alive = Arc::clone(&alive);
        let pending = Arc::clone(&self.pending);
        let key = self.descriptor.key.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let parsed: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(provider = %key, error = %e, "unparseable adapter line");
                        continue;
                    }
                };
                let Some(id) = parsed.get("id").and_then(Value::as_u64) else {
                    warn!(provider = %key, "adapter response without id");
                    continue;
                };
                let Some((_, tx)) = pending.remove(&id) else {
                    debug!(provider = %key, id, "response for unknown request id");
                    continue;
                };
                let reply = if let Some(err) = parsed.get("error") {
                    let message = err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("adapter error")
                        .to_string();
                    WireReply::Error(message)
                } else {
                    WireReply::Result(parsed.get("result").cloned().unwrap_or(Value::Null))
                };
                let _ = tx.send(reply);
            }

            // EOF: the process exited. Dropping the pending senders fails
            // every in-flight request with a transport error.
            reader_alive.store(false, Ordering::SeqCst);
            let ids: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
            for id in ids {
                pending.remove(&id);
            }
            info!(provider = %key, "adapter process stream closed");
        });

        Ok(ProcessState {
            child,
            stdin,
            alive,
        })
    }

    /// Send one request line and await its matched response. `Err` means
    /// the transport failed; a child-reported error comes back as
    /// [`WireReply::Error`].
    async fn request(&self, method: &str, params: Value) -> Result<WireReply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({ "id": id, "method": method, "params": params });
        let mut line = frame.to_string();
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        {
            let mut state = self.state.lock().await;
            let Some(process) = state.as_mut() else {
                self.pending.remove(&id);
                return Err(self.transient("not connected"));
            };
            if !process.alive.load(Ordering::SeqCst) {
                self.pending.remove(&id);
                return Err(self.transient("process exited"));
            }
            if let Err(e) = process.stdin.write_all(line.as_bytes()).await {
                self.pending.remove(&id);
                return Err(self.transient(format!("write failed: {e}")));
            }
        }

        rx.await
            .map_err(|_| self.transient("adapter process exited"))
    }

    /// Request variant for methods where a child-reported error is still a
    /// transport-class failure (discovery, resources).
    async fn request_result(&self, method: &str, params: Value) -> Result<Value> {
        match self.request(method, params).await? {
            WireReply::Result(value) => Ok(value),
            WireReply::Error(message) => Err(self.transient(message)),
        }
    }
}

#[async_trait]
impl Adapter for SubprocessAdapter {
    fn provider_key(&self) -> &str {
        &self.descriptor.key
    }

    async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .as_ref()
            .is_some_and(|p| p.alive.load(Ordering::SeqCst))
        {
            return Ok(());
        }
        info!(provider = %self.descriptor.key, workdir = %self.workdir.display(), "spawning adapter process");
        *state = Some(self.spawn().await?);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.request_result("list_tools", json!({})).await?;
        let raw = result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut tools = Vec::with_capacity(raw.len());
        for tool in raw {
            tools.push(ToolDescriptor {
                name: tool
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
                provider_key: self.descriptor.key.clone(),
                requires_detailed_schema: tool
                    .get("requires_detailed_schema")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutcome> {
        let params = json!({ "name": name, "arguments": arguments });
        // Child-reported errors become error outcomes the model can react
        // to; transport failures stay `Err` for the reconnect-retry path.
        match self.request("call_tool", params).await? {
            WireReply::Result(result) => Ok(normalize_outcome(result)),
            WireReply::Error(message) => Ok(ToolOutcome::error(message)),
        }
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>> {
        let result = self.request_result("list_resources", json!({})).await?;
        let raw = result
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(raw
            .into_iter()
            .filter_map(|r| serde_json::from_value(r).ok())
            .collect())
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent> {
        let result = self
            .request_result("read_resource", json!({ "uri": uri }))
            .await?;
        let bytes = result
            .get("data")
            .and_then(Value::as_str)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| AdapterError::Resource {
                provider: self.descriptor.key.clone(),
                uri: uri.to_string(),
                reason: "missing data field".into(),
            })?;
        let media_type = result
            .get("media_type")
            .and_then(Value::as_str)
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(ResourceContent { bytes, media_type })
    }

    async fn is_connected(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| p.alive.load(Ordering::SeqCst))
    }

    async fn reconnect(&self) -> Result<()> {
        info!(provider = %self.descriptor.key, "reconnecting adapter process");
        self.close().await?;
        self.connect().await
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(mut process) = state.take() {
            process.alive.store(false, Ordering::SeqCst);
            if let Err(e) = process.child.kill().await {
                warn!(provider = %self.descriptor.key, error = %e, "kill failed");
            }
            let _ = process.child.wait().await;
            debug!(provider = %self.descriptor.key, "adapter process terminated");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
