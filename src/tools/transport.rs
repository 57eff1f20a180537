use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::error::{ToolError, ToolResult};
use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::spec::expand_env_value;

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Child process speaking line-delimited JSON-RPC over stdin/stdout.
pub(crate) struct StdioTransport {
    name: String,
    next_id: AtomicU64,
    pending: PendingMap,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    timeout: Duration,
}

impl StdioTransport {
    pub(crate) fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> ToolResult<Self> {
        info!(adapter = %name, command = %command, args = ?args, "Starting tool adapter process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, expand_env_value(key, value));
        }

        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolError::Transport("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::Transport("failed to capture stdout".to_string()))?;

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));

        let reader_pending = pending.clone();
        let reader_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        debug!(adapter = %reader_name, line = %line, "Received from tool adapter");
                        match serde_json::from_str::<JsonRpcResponse>(&line) {
                            Ok(response) => {
                                let Some(id) = response.request_id() else {
                                    continue;
                                };
                                let sender = reader_pending
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner())
                                    .remove(&id);
                                if let Some(sender) = sender {
                                    let _ = sender.send(response);
                                }
                            }
                            Err(err) => {
                                warn!(adapter = %reader_name, error = %err, "Ignoring unparsable adapter output");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(adapter = %reader_name, error = %err, "Adapter stdout read failed");
                        break;
                    }
                }
            }

            // Dropping the senders wakes every waiter with a closed channel.
            reader_pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            debug!(adapter = %reader_name, "Adapter reader exited");
        });

        if let Some(stderr) = child.stderr.take() {
            let stderr_name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(adapter = %stderr_name, "stderr: {line}");
                }
            });
        }

        Ok(Self {
            name: name.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            timeout,
        })
    }

    pub(crate) async fn request(&self, method: &str, params: Option<Value>) -> ToolResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let request = JsonRpcRequest::call(id, method, params);
        if let Err(err) = self.write(&request).await {
            self.forget(id);
            return Err(err);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ToolError::Transport(format!(
                    "adapter `{}` closed its output before answering {method}",
                    self.name
                )))
            }
            Err(_) => {
                self.forget(id);
                return Err(ToolError::Timeout(self.timeout));
            }
        };

        response.into_result()
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> ToolResult<()> {
        self.write(&JsonRpcRequest::notification(method, params))
            .await
    }

    pub(crate) async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(process) => matches!(process.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub(crate) async fn stop(&self) {
        self.stdin.lock().await.take();
        if let Some(mut process) = self.child.lock().await.take() {
            if let Err(err) = process.kill().await {
                debug!(adapter = %self.name, error = %err, "Adapter process already gone");
            }
            info!(adapter = %self.name, "Tool adapter process stopped");
        }
    }

    async fn write(&self, request: &JsonRpcRequest) -> ToolResult<()> {
        let mut line = serde_json::to_string(request)
            .map_err(|err| ToolError::Protocol(format!("failed to encode request: {err}")))?;
        line.push('\n');

        debug!(adapter = %self.name, request = %line.trim_end(), "Sending to tool adapter");

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| ToolError::Stopped(self.name.clone()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| ToolError::Transport(format!("failed to write to stdin: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| ToolError::Transport(format!("failed to flush stdin: {err}")))
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}

/// Endpoint-based adapter: JSON-RPC requests are POSTed to a single URL.
pub(crate) struct HttpTransport {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub(crate) fn new(url: &str, timeout: Duration) -> ToolResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) async fn probe(&self) -> ToolResult<()> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Transport(format!(
                "{} answered HTTP {status}",
                self.url
            )));
        }
        Ok(())
    }

    pub(crate) async fn request(&self, method: &str, params: Option<Value>) -> ToolResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response: JsonRpcResponse = self
            .client
            .post(&self.url)
            .json(&JsonRpcRequest::call(id, method, params))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_result()
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> ToolResult<()> {
        self.client
            .post(&self.url)
            .json(&JsonRpcRequest::notification(method, params))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
