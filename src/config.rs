use std::collections::BTreeMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::facade::FacadeConfig;
use crate::orchestrator::CrewSettings;
use crate::tools::{load_tool_file, ConnectOptions, ToolProfile, ToolSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Hierarchical engine driven by the configured LLM.
    Llm,
    /// Offline stand-in that echoes each task back.
    Echo,
}

impl FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "llm" | "openai" | "ollama" => Ok(Self::Llm),
            "echo" => Ok(Self::Echo),
            other => bail!("unknown engine '{other}' (expected 'llm' or 'echo')"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineKind,
    pub llm: LlmConfig,
    /// Root of the local Ollama server; its `/api/tags` route doubles as the health check.
    pub ollama_url: String,
    pub tool_profile: ToolProfile,
    pub tools_file: Option<PathBuf>,
    pub fs_root: String,
    pub db_path: String,
    pub connect: ConnectOptions,
    pub status_timeout: Duration,
    pub settings: CrewSettings,
}

impl AppConfig {
    const ENGINE_VARS: [&'static str; 1] = ["DATAFLOW_ENGINE"];
    const API_BASE_VARS: [&'static str; 2] = ["DATAFLOW_LLM_BASE_URL", "OPENAI_BASE_URL"];
    const API_KEY_VARS: [&'static str; 2] = ["DATAFLOW_LLM_API_KEY", "OPENAI_API_KEY"];
    const MODEL_VARS: [&'static str; 1] = ["DATAFLOW_LLM_MODEL"];
    const TEMPERATURE_VARS: [&'static str; 1] = ["DATAFLOW_LLM_TEMPERATURE"];
    const OLLAMA_URL_VARS: [&'static str; 2] = ["DATAFLOW_OLLAMA_URL", "OLLAMA_HOST"];
    const PROFILE_VARS: [&'static str; 1] = ["DATAFLOW_TOOL_PROFILE"];
    const TOOLS_FILE_VARS: [&'static str; 1] = ["DATAFLOW_TOOLS_FILE"];
    const FS_ROOT_VARS: [&'static str; 1] = ["DATAFLOW_FS_ROOT"];
    const DB_PATH_VARS: [&'static str; 1] = ["DATAFLOW_DB_PATH"];
    const HANDSHAKE_VARS: [&'static str; 1] = ["DATAFLOW_TOOL_HANDSHAKE"];
    const TOOL_TIMEOUT_VARS: [&'static str; 1] = ["DATAFLOW_TOOL_TIMEOUT_MS"];
    const STATUS_TIMEOUT_VARS: [&'static str; 1] = ["DATAFLOW_STATUS_TIMEOUT_MS"];
    const MAX_ITER_VARS: [&'static str; 1] = ["DATAFLOW_MAX_ITER"];
    const MAX_RPM_VARS: [&'static str; 1] = ["DATAFLOW_MAX_RPM"];
    const MEMORY_VARS: [&'static str; 1] = ["DATAFLOW_MEMORY"];

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_source<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |candidates: &[&'static str]| candidates.iter().find_map(|key| lookup(key));

        let engine = read(&Self::ENGINE_VARS)
            .map(|value| value.parse::<EngineKind>())
            .transpose()
            .context("DATAFLOW_ENGINE is invalid")?
            .unwrap_or(EngineKind::Llm);

        let tool_profile = read(&Self::PROFILE_VARS)
            .map(|value| value.parse::<ToolProfile>())
            .transpose()
            .context("DATAFLOW_TOOL_PROFILE is invalid")?
            .unwrap_or(ToolProfile::Chat);

        let llm = LlmConfig {
            api_base: read(&Self::API_BASE_VARS)
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
            api_key: read(&Self::API_KEY_VARS).unwrap_or_else(|| "ollama".to_string()),
            model: read(&Self::MODEL_VARS).unwrap_or_else(|| "qwen3:8b".to_string()),
            temperature: parse_var(read(&Self::TEMPERATURE_VARS), Self::TEMPERATURE_VARS[0])?
                .unwrap_or(0.2),
        };

        let defaults = CrewSettings::default();
        let max_iter = parse_var::<u32>(read(&Self::MAX_ITER_VARS), Self::MAX_ITER_VARS[0])?
            .unwrap_or(defaults.max_iter);
        if max_iter == 0 {
            bail!("DATAFLOW_MAX_ITER must be at least 1");
        }
        let settings = CrewSettings {
            max_iter,
            max_rpm: match parse_var::<u32>(read(&Self::MAX_RPM_VARS), Self::MAX_RPM_VARS[0])? {
                Some(0) => None,
                Some(rpm) => Some(rpm),
                None => defaults.max_rpm,
            },
            memory: read(&Self::MEMORY_VARS)
                .map(|value| parse_flag(&value))
                .unwrap_or(defaults.memory),
        };

        let connect = ConnectOptions {
            handshake: read(&Self::HANDSHAKE_VARS)
                .map(|value| parse_flag(&value))
                .unwrap_or(true),
            timeout: Duration::from_millis(
                parse_var(read(&Self::TOOL_TIMEOUT_VARS), Self::TOOL_TIMEOUT_VARS[0])?
                    .unwrap_or(30_000),
            ),
        };

        Ok(Self {
            engine,
            llm,
            ollama_url: read(&Self::OLLAMA_URL_VARS)
                .map(|value| with_http_scheme(&value))
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            tool_profile,
            tools_file: read(&Self::TOOLS_FILE_VARS).map(PathBuf::from),
            fs_root: read(&Self::FS_ROOT_VARS).unwrap_or_else(|| ".".to_string()),
            db_path: read(&Self::DB_PATH_VARS).unwrap_or_else(|| "dataflow.db".to_string()),
            connect,
            status_timeout: Duration::from_millis(
                parse_var(read(&Self::STATUS_TIMEOUT_VARS), Self::STATUS_TIMEOUT_VARS[0])?
                    .unwrap_or(5_000),
            ),
            settings,
        })
    }

    /// Adapter specs for this run: the tool file when given, otherwise the named profile.
    pub fn tool_specs(&self) -> anyhow::Result<BTreeMap<String, ToolSpec>> {
        match &self.tools_file {
            Some(path) => load_tool_file(path),
            None => Ok(self
                .tool_profile
                .default_specs(&self.fs_root, &self.db_path)),
        }
    }

    pub fn facade_config(&self) -> anyhow::Result<FacadeConfig> {
        Ok(FacadeConfig {
            tool_specs: self.tool_specs()?,
            connect: self.connect.clone(),
            settings: self.settings.clone(),
        })
    }

    pub fn ollama_health_url(&self) -> String {
        format!("{}/api/tags", self.ollama_url.trim_end_matches('/'))
    }
}

fn parse_var<T>(value: Option<String>, var: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|err| anyhow::anyhow!("{var} is invalid ('{raw}'): {err}"))
        })
        .transpose()
}

/// `OLLAMA_HOST` is usually `host:port` without a scheme.
fn with_http_scheme(value: &str) -> String {
    let value = value.trim();
    if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{value}")
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_source(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_target_local_ollama() {
        let config = config_from(&[]).expect("defaults");
        assert_eq!(config.engine, EngineKind::Llm);
        assert_eq!(config.llm.api_base, "http://localhost:11434/v1");
        assert_eq!(config.llm.model, "qwen3:8b");
        assert_eq!(config.ollama_health_url(), "http://localhost:11434/api/tags");
        assert_eq!(config.tool_profile, ToolProfile::Chat);
        assert_eq!(config.status_timeout, Duration::from_secs(5));
        assert_eq!(config.settings.max_iter, 15);
        assert_eq!(config.settings.max_rpm, Some(10));
        assert!(config.connect.handshake);
    }

    #[test]
    fn primary_variables_win_over_fallbacks() {
        let config = config_from(&[
            ("DATAFLOW_LLM_BASE_URL", "http://gpu-box:8000/v1"),
            ("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .expect("config");
        assert_eq!(config.llm.api_base, "http://gpu-box:8000/v1");
        assert_eq!(config.llm.api_key, "sk-test");
    }

    #[test]
    fn zero_rpm_disables_throttling_and_flags_parse() {
        let config = config_from(&[
            ("DATAFLOW_MAX_RPM", "0"),
            ("DATAFLOW_TOOL_HANDSHAKE", "false"),
            ("DATAFLOW_MEMORY", "0"),
            ("DATAFLOW_ENGINE", "echo"),
            ("DATAFLOW_TOOL_PROFILE", "pipeline"),
            ("DATAFLOW_OLLAMA_URL", "http://10.0.0.5:11434/"),
        ])
        .expect("config");
        assert_eq!(config.settings.max_rpm, None);
        assert!(!config.settings.memory);
        assert!(!config.connect.handshake);
        assert_eq!(config.engine, EngineKind::Echo);
        assert_eq!(config.ollama_health_url(), "http://10.0.0.5:11434/api/tags");

        let specs = config.tool_specs().expect("profile specs");
        assert!(specs.contains_key(crate::tools::EMBEDDED_DB));
    }

    #[test]
    fn schemeless_ollama_host_gets_http() {
        let config = config_from(&[("OLLAMA_HOST", "127.0.0.1:11434")]).expect("config");
        assert_eq!(config.ollama_url, "http://127.0.0.1:11434");
        assert_eq!(config.ollama_health_url(), "http://127.0.0.1:11434/api/tags");

        let config = config_from(&[("OLLAMA_HOST", "https://gpu-box:11434")]).expect("config");
        assert_eq!(config.ollama_health_url(), "https://gpu-box:11434/api/tags");
    }

    #[test]
    fn invalid_numbers_are_reported() {
        let err = config_from(&[("DATAFLOW_LLM_TEMPERATURE", "warm")]).expect_err("temperature");
        assert!(format!("{err:#}").contains("DATAFLOW_LLM_TEMPERATURE is invalid ('warm')"));

        let err = config_from(&[("DATAFLOW_MAX_RPM", "-5")]).expect_err("rpm");
        assert!(format!("{err:#}").contains("DATAFLOW_MAX_RPM"));

        let err = config_from(&[("DATAFLOW_TOOL_TIMEOUT_MS", "30s")]).expect_err("timeout");
        assert!(format!("{err:#}").contains("DATAFLOW_TOOL_TIMEOUT_MS"));

        let err = config_from(&[("DATAFLOW_MAX_ITER", "0")]).expect_err("max_iter");
        assert!(format!("{err:#}").contains("at least 1"));
    }

    #[test]
    fn invalid_profile_is_reported() {
        let err = config_from(&[("DATAFLOW_TOOL_PROFILE", "streaming")]).expect_err("invalid");
        assert!(format!("{err:#}").contains("streaming"));
    }

    #[test]
    fn tool_file_replaces_the_profile() {
        let path = std::env::temp_dir().join(format!(
            "dataflow-tools-{}.json",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        std::fs::write(
            &path,
            r#"{"custom": {"type": "http", "url": "http://127.0.0.1:8811/mcp"}}"#,
        )
        .expect("write tool file");

        let config = config_from(&[("DATAFLOW_TOOLS_FILE", path.to_str().expect("utf-8 path"))])
            .expect("config");
        let specs = config.tool_specs().expect("tool file");
        assert_eq!(specs.keys().collect::<Vec<_>>(), vec!["custom"]);

        let _ = std::fs::remove_file(&path);
    }
}
