use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::error::{ToolError, ToolResult};
use super::protocol::{
    flatten_call_result, initialize_params, parse_tool_list, ToolDescriptor,
};
use super::registry::ConnectOptions;
use super::spec::ToolSpec;
use super::transport::{HttpTransport, StdioTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Live,
    Exited,
    Stopped,
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToolStatus::Live => "live",
            ToolStatus::Exited => "exited",
            ToolStatus::Stopped => "stopped",
        };
        write!(f, "{label}")
    }
}

enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    async fn request(&self, method: &str, params: Option<Value>) -> ToolResult<Value> {
        match self {
            Transport::Stdio(stdio) => stdio.request(method, params).await,
            Transport::Http(http) => http.request(method, params).await,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ToolResult<()> {
        match self {
            Transport::Stdio(stdio) => stdio.notify(method, params).await,
            Transport::Http(http) => http.notify(method, params).await,
        }
    }

    async fn stop(&self) {
        if let Transport::Stdio(stdio) = self {
            stdio.stop().await;
        }
    }
}

/// Live connection to one named tool adapter.
pub struct ToolHandle {
    name: String,
    spec: ToolSpec,
    transport: Transport,
    tools: Vec<ToolDescriptor>,
    connected_at: DateTime<Utc>,
    stopped: AtomicBool,
}

impl ToolHandle {
    #[instrument(skip(spec, options), fields(spec = %spec))]
    pub async fn connect(
        name: &str,
        spec: ToolSpec,
        options: &ConnectOptions,
    ) -> ToolResult<Self> {
        let transport = match &spec {
            ToolSpec::Stdio { command, args, env } => Transport::Stdio(StdioTransport::spawn(
                name,
                command,
                args,
                env,
                options.timeout,
            )?),
            ToolSpec::Http { url } => Transport::Http(HttpTransport::new(url, options.timeout)?),
        };

        let tools = if options.handshake {
            match handshake(name, &transport).await {
                Ok(tools) => tools,
                Err(err) => {
                    transport.stop().await;
                    return Err(err);
                }
            }
        } else {
            if let Transport::Http(http) = &transport {
                http.probe().await?;
            }
            Vec::new()
        };

        Ok(Self {
            name: name.to_string(),
            spec,
            transport,
            tools,
            connected_at: Utc::now(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    /// Actions advertised during the handshake (empty when the handshake is off).
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn status(&self) -> ToolStatus {
        if self.stopped.load(Ordering::SeqCst) {
            return ToolStatus::Stopped;
        }

        match &self.transport {
            Transport::Stdio(stdio) if !stdio.is_alive().await => ToolStatus::Exited,
            _ => ToolStatus::Live,
        }
    }

    #[instrument(skip(self, arguments), fields(adapter = %self.name))]
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> ToolResult<String> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(ToolError::Stopped(self.name.clone()));
        }

        let result = self
            .transport
            .request(
                "tools/call",
                Some(json!({ "name": tool, "arguments": arguments })),
            )
            .await?;
        flatten_call_result(result)
    }

    pub async fn shutdown(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.transport.stop().await;
        }
    }
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolHandle")
            .field("name", &self.name)
            .field("spec", &self.spec)
            .field("tools", &self.tools.len())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

async fn handshake(name: &str, transport: &Transport) -> ToolResult<Vec<ToolDescriptor>> {
    let init = transport
        .request("initialize", Some(initialize_params()))
        .await?;
    debug!(
        adapter = %name,
        protocol = init.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
        "Adapter accepted initialize"
    );

    transport.notify("notifications/initialized", None).await?;

    let listed = transport.request("tools/list", None).await?;
    parse_tool_list(listed)
}
