use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const FILESYSTEM: &str = "filesystem";
pub const DATA_EXPLORATION: &str = "data_exploration";
pub const TABULAR_DATA: &str = "tabular_data";
pub const EMBEDDED_DB: &str = "embedded_db";

/// How to reach a tool adapter: spawn a process speaking line-delimited JSON-RPC,
/// or talk to an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolSpec {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    Http {
        url: String,
    },
}

impl ToolSpec {
    pub fn stdio<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stdio {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::Http { url: url.into() }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Stdio { env, .. } = &mut self {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http { url } => Some(url),
            Self::Stdio { .. } => None,
        }
    }
}

impl fmt::Display for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio { command, args, .. } if args.is_empty() => write!(f, "{command}"),
            Self::Stdio { command, args, .. } => write!(f, "{command} {}", args.join(" ")),
            Self::Http { url } => write!(f, "{url}"),
        }
    }
}

/// Resolve `${VAR}` references against the process environment.
pub(crate) fn expand_env_value(key: &str, value: &str) -> String {
    let Some(var_name) = value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return value.to_string();
    };

    match env::var(var_name) {
        Ok(resolved) => resolved,
        Err(_) => {
            warn!(
                var = %var_name,
                key = %key,
                "Environment variable not found, using empty string"
            );
            String::new()
        }
    }
}

/// Named adapter sets: the chat assistant and the batch pipeline use different tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolProfile {
    Chat,
    Pipeline,
}

impl ToolProfile {
    pub fn default_specs(self, fs_root: &str, db_path: &str) -> BTreeMap<String, ToolSpec> {
        let mut specs = BTreeMap::new();
        specs.insert(
            FILESYSTEM.to_string(),
            ToolSpec::stdio(
                "npx",
                ["-y", "@modelcontextprotocol/server-filesystem", fs_root],
            ),
        );

        match self {
            Self::Chat => {
                specs.insert(
                    DATA_EXPLORATION.to_string(),
                    ToolSpec::stdio("uvx", ["mcp-server-data-exploration"]),
                );
            }
            Self::Pipeline => {
                specs.insert(
                    TABULAR_DATA.to_string(),
                    ToolSpec::stdio("uvx", ["mcp-server-data-exploration"]),
                );
                specs.insert(
                    EMBEDDED_DB.to_string(),
                    ToolSpec::stdio("uvx", ["mcp-server-sqlite", "--db-path", db_path]),
                );
            }
        }

        specs
    }
}

impl FromStr for ToolProfile {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "pipeline" => Ok(Self::Pipeline),
            other => bail!("unknown tool profile '{other}' (expected 'chat' or 'pipeline')"),
        }
    }
}

impl fmt::Display for ToolProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Chat => "chat",
            Self::Pipeline => "pipeline",
        };
        write!(f, "{label}")
    }
}

/// Load a `name -> spec` JSON map that replaces the built-in profile.
pub fn load_tool_file(path: &Path) -> anyhow::Result<BTreeMap<String, ToolSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Tool file {} is not a valid adapter map", path.display()))
}
