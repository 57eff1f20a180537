use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tasks::TaskSpec;

use super::session::OrchestrationSession;

pub type SharedCrewEngine = Arc<dyn CrewEngine>;

/// Execution backend for a composed crew. The session picks the process mode and supplies
/// the roster; delegation, tool use, and aggregation all happen behind this trait.
#[async_trait]
pub trait CrewEngine: Send + Sync {
    async fn kickoff(
        &self,
        session: &OrchestrationSession,
        task: &TaskSpec,
    ) -> anyhow::Result<CrewOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Process {
    /// Coordinator is the delegation root; specialists only execute.
    Hierarchical,
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Process::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrewSettings {
    /// Upper bound on reasoning turns per agent before the run is abandoned.
    pub max_iter: u32,
    /// Model requests per minute; `None` disables spacing.
    pub max_rpm: Option<u32>,
    /// Carry a short digest of earlier turns into later prompts.
    pub memory: bool,
}

impl Default for CrewSettings {
    fn default() -> Self {
        Self {
            max_iter: 15,
            max_rpm: Some(10),
            memory: true,
        }
    }
}

/// Engine-native result of a kickoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CrewOutput {
    Structured {
        raw: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    Opaque(Value),
}

impl CrewOutput {
    pub fn structured(raw: impl Into<String>) -> Self {
        Self::Structured {
            raw: raw.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(self, metadata: Value) -> Self {
        match self {
            Self::Structured { raw, .. } => Self::Structured {
                raw,
                metadata: Some(metadata),
            },
            opaque => opaque,
        }
    }

    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Structured { raw, .. } => Some(raw),
            Self::Opaque(_) => None,
        }
    }

    pub fn metadata(&self) -> Option<&Value> {
        match self {
            Self::Structured { metadata, .. } => metadata.as_ref(),
            Self::Opaque(_) => None,
        }
    }

    /// `raw` for structured output, otherwise the value rendered as text.
    pub fn into_text(self) -> String {
        match self {
            Self::Structured { raw, .. } => raw,
            Self::Opaque(Value::String(text)) => text,
            Self::Opaque(value) => value.to_string(),
        }
    }
}

impl fmt::Display for CrewOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured { raw, .. } => write!(f, "{raw}"),
            Self::Opaque(Value::String(text)) => write!(f, "{text}"),
            Self::Opaque(value) => write!(f, "{value}"),
        }
    }
}

/// Offline stand-in: answers every task with its own description.
#[derive(Debug, Default, Clone)]
pub struct EchoCrewEngine;

impl EchoCrewEngine {
    pub fn shared() -> SharedCrewEngine {
        Arc::new(Self)
    }
}

#[async_trait]
impl CrewEngine for EchoCrewEngine {
    async fn kickoff(
        &self,
        _session: &OrchestrationSession,
        task: &TaskSpec,
    ) -> anyhow::Result<CrewOutput> {
        Ok(CrewOutput::structured(task.description()))
    }
}
