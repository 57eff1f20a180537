//! Chat and pipeline entry points over one lazily composed crew.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use crate::agents::Roster;
use crate::orchestrator::{CrewOutput, CrewSettings, OrchestrationSession, SharedCrewEngine};
use crate::tasks::{render_chat_task, render_pipeline_task};
use crate::tools::{ConnectOptions, ToolRegistry, ToolSpec};

const APOLOGY_PREFIX: &str = "I apologize, but I encountered an error: ";

#[derive(Debug, Clone, Default)]
pub struct FacadeConfig {
    pub tool_specs: BTreeMap<String, ToolSpec>,
    pub connect: ConnectOptions,
    pub settings: CrewSettings,
}

/// Outcome of one chat turn. Errors keep their source for logging and inspection;
/// only `to_text` turns them into a user-facing apology.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChatTurnResult {
    Success {
        results: String,
    },
    Error {
        error: String,
        #[serde(skip)]
        source: anyhow::Error,
    },
}

impl ChatTurnResult {
    pub fn success(results: impl Into<String>) -> Self {
        Self::Success {
            results: results.into(),
        }
    }

    pub fn failure(source: anyhow::Error) -> Self {
        Self::Error {
            error: format!("{source:#}"),
            source,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn source(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Success { .. } => None,
            Self::Error { source, .. } => Some(source),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Success { results } => results.clone(),
            Self::Error { error, .. } => format!("{APOLOGY_PREFIX}{error}"),
        }
    }
}

pub struct Facade {
    config: FacadeConfig,
    engine: SharedCrewEngine,
    tools: OnceCell<Arc<ToolRegistry>>,
    session: OnceCell<Arc<OrchestrationSession>>,
}

impl Facade {
    /// Connect tools and compose the crew on first use.
    pub fn new(config: FacadeConfig, engine: SharedCrewEngine) -> Self {
        Self {
            config,
            engine,
            tools: OnceCell::new(),
            session: OnceCell::new(),
        }
    }

    /// Wrap a session the caller already composed; nothing is initialized lazily.
    pub fn with_session(session: Arc<OrchestrationSession>) -> Self {
        Self {
            config: FacadeConfig {
                tool_specs: session.tools().specs(),
                settings: session.settings().clone(),
                ..FacadeConfig::default()
            },
            engine: session.engine().clone(),
            tools: OnceCell::new_with(Some(session.tools().clone())),
            session: OnceCell::new_with(Some(session)),
        }
    }

    /// The composed session, once the first turn (or `with_session`) created it.
    pub fn session(&self) -> Option<&Arc<OrchestrationSession>> {
        self.session.get()
    }

    pub fn tools(&self) -> Option<&Arc<ToolRegistry>> {
        self.tools.get()
    }

    pub fn tool_specs(&self) -> &BTreeMap<String, ToolSpec> {
        &self.config.tool_specs
    }

    async fn ensure_tools(&self) -> Arc<ToolRegistry> {
        self.tools
            .get_or_init(|| async {
                let registry =
                    ToolRegistry::initialize(&self.config.tool_specs, &self.config.connect).await;
                if registry.len() < self.config.tool_specs.len() {
                    warn!(
                        connected = registry.len(),
                        configured = self.config.tool_specs.len(),
                        "Continuing with a reduced tool set"
                    );
                }
                Arc::new(registry)
            })
            .await
            .clone()
    }

    async fn ensure_session(&self) -> Arc<OrchestrationSession> {
        self.session
            .get_or_init(|| async {
                let tools = self.ensure_tools().await;
                let roster = Roster::build(&tools);
                Arc::new(OrchestrationSession::compose(
                    roster,
                    tools,
                    self.engine.clone(),
                    self.config.settings.clone(),
                ))
            })
            .await
            .clone()
    }

    /// One conversational turn. Never fails; engine errors come back as `ChatTurnResult::Error`.
    #[instrument(skip_all, fields(message_len = message.len()))]
    pub async fn chat(&self, message: &str) -> ChatTurnResult {
        let session = self.ensure_session().await;
        match session.submit(render_chat_task(message)).await {
            Ok(text) => ChatTurnResult::success(text),
            Err(err) => {
                warn!(error = %err, "Chat turn failed");
                ChatTurnResult::failure(err)
            }
        }
    }

    /// Batch run over one file. Engine errors are returned as-is for the caller to report.
    #[instrument(skip_all, fields(file = %file_path))]
    pub async fn run_pipeline(&self, file_path: &str) -> anyhow::Result<CrewOutput> {
        let session = self.ensure_session().await;
        info!("Starting pipeline run");
        session.kickoff(render_pipeline_task(file_path)).await
    }

    pub async fn shutdown(&self) {
        if let Some(tools) = self.tools.get() {
            tools.shutdown().await;
        }
    }
}
