use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

use crate::agents::{AgentDefinition, Roster};
use crate::tasks::TaskSpec;
use crate::tools::ToolRegistry;

use super::engine::{CrewOutput, CrewSettings, Process, SharedCrewEngine};

/// Coordinator, specialists, and tools bound into one hierarchical crew.
///
/// The session owns a single task slot. `kickoff` holds the turn lock until the engine returns,
/// so overlapping turns wait their turn instead of overwriting each other. The slot itself is
/// only locked while it is replaced or read.
pub struct OrchestrationSession {
    roster: Roster,
    tools: Arc<ToolRegistry>,
    engine: SharedCrewEngine,
    settings: CrewSettings,
    process: Process,
    turn: Mutex<()>,
    active_task: Mutex<Option<TaskSpec>>,
    composed_at: DateTime<Utc>,
}

impl OrchestrationSession {
    pub fn compose(
        roster: Roster,
        tools: Arc<ToolRegistry>,
        engine: SharedCrewEngine,
        settings: CrewSettings,
    ) -> Self {
        let specialist_roles: Vec<&str> =
            roster.specialists().iter().map(AgentDefinition::role).collect();
        info!(
            coordinator = %roster.coordinator().role(),
            specialists = ?specialist_roles,
            tools = ?tools.names().collect::<Vec<_>>(),
            max_iter = settings.max_iter,
            max_rpm = ?settings.max_rpm,
            memory = settings.memory,
            "Composed hierarchical crew"
        );

        Self {
            roster,
            tools,
            engine,
            settings,
            process: Process::Hierarchical,
            turn: Mutex::new(()),
            active_task: Mutex::new(None),
            composed_at: Utc::now(),
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn settings(&self) -> &CrewSettings {
        &self.settings
    }

    pub fn process(&self) -> Process {
        self.process
    }

    pub fn composed_at(&self) -> DateTime<Utc> {
        self.composed_at
    }

    pub(crate) fn engine(&self) -> &SharedCrewEngine {
        &self.engine
    }

    /// Most recently submitted task; during a kickoff, the task being run.
    pub async fn active_task(&self) -> Option<TaskSpec> {
        self.active_task.lock().await.clone()
    }

    /// Run `task` as the session's only task and return the engine's own result.
    #[instrument(skip_all, fields(mode = %task.mode(), process = %self.process))]
    pub async fn kickoff(&self, task: TaskSpec) -> anyhow::Result<CrewOutput> {
        let _turn = self.turn.lock().await;
        let task = self.active_task.lock().await.insert(task).clone();

        match self.engine.kickoff(self, &task).await {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(error = %format!("{err:#}"), "Crew execution failed");
                Err(err)
            }
        }
    }

    /// Like `kickoff`, but unwraps the engine result to text.
    pub async fn submit(&self, task: TaskSpec) -> anyhow::Result<String> {
        Ok(self.kickoff(task).await?.into_text())
    }
}
