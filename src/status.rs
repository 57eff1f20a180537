use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::facade::Facade;
use crate::tools::{ToolRegistry, ToolSpec, ToolStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reachability {
    Reachable,
    Unreachable { reason: String },
    /// Stdio adapter that has not been spawned yet.
    NotStarted,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable)
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Reachable => write!(f, "connected"),
            Reachability::Unreachable { reason } => write!(f, "unreachable ({reason})"),
            Reachability::NotStarted => write!(f, "not started"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub target: String,
    pub state: Reachability,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub llm: ComponentStatus,
    pub tools: Vec<ComponentStatus>,
}

impl StatusReport {
    pub fn render(&self) -> String {
        let mut lines = vec![String::from("System status")];
        for component in std::iter::once(&self.llm).chain(self.tools.iter()) {
            let marker = match component.state {
                Reachability::Reachable => "✔",
                Reachability::Unreachable { .. } => "✖",
                Reachability::NotStarted => "·",
            };
            lines.push(format!(
                "  {marker} {} [{}]: {}",
                component.name, component.target, component.state
            ));
        }
        if self.tools.is_empty() {
            lines.push(String::from("  · no tool adapters configured"));
        }
        lines.join("\n")
    }
}

/// Sidebar-style health checks: plain GETs with a short timeout, success means HTTP 200.
pub struct StatusProbe {
    http: reqwest::Client,
}

impl StatusProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build status HTTP client")?;
        Ok(Self { http })
    }

    pub async fn check_url(&self, url: &str) -> Reachability {
        match self.http.get(url).send().await {
            Ok(response) if response.status() == StatusCode::OK => Reachability::Reachable,
            Ok(response) => Reachability::Unreachable {
                reason: format!("HTTP {}", response.status()),
            },
            Err(err) => {
                debug!(url = %url, error = %err, "Status probe failed");
                Reachability::Unreachable {
                    reason: if err.is_timeout() {
                        "timed out".to_string()
                    } else {
                        "connection failed".to_string()
                    },
                }
            }
        }
    }

    /// `registry` is `None` until the façade has connected its tools; stdio adapters then
    /// report as not started and HTTP adapters are probed directly.
    pub async fn report(
        &self,
        llm_health_url: &str,
        model: &str,
        specs: &BTreeMap<String, ToolSpec>,
        registry: Option<&ToolRegistry>,
    ) -> StatusReport {
        let llm = ComponentStatus {
            name: format!("LLM backend ({model})"),
            target: llm_health_url.to_string(),
            state: self.check_url(llm_health_url).await,
        };

        let mut tools = Vec::with_capacity(specs.len());
        for (name, spec) in specs {
            let state = match (registry, spec) {
                (Some(registry), _) if !registry.contains(name) => Reachability::Unreachable {
                    reason: "failed to initialize".to_string(),
                },
                (_, ToolSpec::Http { url }) => self.check_url(url).await,
                (Some(registry), ToolSpec::Stdio { .. }) => match registry.get(name) {
                    Some(handle) => match handle.status().await {
                        ToolStatus::Live => Reachability::Reachable,
                        other => Reachability::Unreachable {
                            reason: format!("process {other}"),
                        },
                    },
                    None => Reachability::NotStarted,
                },
                (None, ToolSpec::Stdio { .. }) => Reachability::NotStarted,
            };

            tools.push(ComponentStatus {
                name: name.clone(),
                target: spec.to_string(),
                state,
            });
        }

        StatusReport { llm, tools }
    }
}

/// Probe plus the fixed LLM target, rendered against whatever the façade has connected.
pub struct StatusPanel {
    probe: StatusProbe,
    llm_health_url: String,
    model: String,
}

impl StatusPanel {
    pub fn new(
        probe: StatusProbe,
        llm_health_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            probe,
            llm_health_url: llm_health_url.into(),
            model: model.into(),
        }
    }

    pub async fn report(&self, facade: &Facade) -> StatusReport {
        self.probe
            .report(
                &self.llm_health_url,
                &self.model,
                facade.tool_specs(),
                facade.tools().map(|tools| tools.as_ref()),
            )
            .await
    }

    pub async fn render(&self, facade: &Facade) -> String {
        self.report(facade).await.render()
    }
}
