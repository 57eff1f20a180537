use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use super::handle::ToolHandle;
use super::spec::ToolSpec;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Run the initialize + tools/list exchange before declaring an adapter live.
    pub handshake: bool,
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake: true,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Named tool adapters available to the current orchestration session.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    handles: BTreeMap<String, Arc<ToolHandle>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Connect every configured adapter. Failures are logged and the adapter is left out;
    /// a partially (or entirely) empty registry is still a usable result.
    #[instrument(skip_all, fields(adapters = configs.len()))]
    pub async fn initialize(
        configs: &BTreeMap<String, ToolSpec>,
        options: &ConnectOptions,
    ) -> Self {
        let mut handles = BTreeMap::new();

        for (name, spec) in configs {
            match ToolHandle::connect(name, spec.clone(), options).await {
                Ok(handle) => {
                    info!(
                        adapter = %name,
                        tools = handle.tools().len(),
                        "Tool adapter initialized"
                    );
                    handles.insert(name.clone(), Arc::new(handle));
                }
                Err(err) => {
                    warn!(
                        adapter = %name,
                        error = %err,
                        "Failed to initialize tool adapter (continuing without it)"
                    );
                }
            }
        }

        Self { handles }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolHandle>> {
        self.handles.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Specs of the adapters that actually connected.
    pub fn specs(&self) -> BTreeMap<String, ToolSpec> {
        self.handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.spec().clone()))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn shutdown(&self) {
        for handle in self.handles.values() {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handle::ToolStatus;
    use serde_json::json;

    fn quick_options(handshake: bool) -> ConnectOptions {
        ConnectOptions {
            handshake,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn empty_config_yields_empty_registry() {
        let registry = ToolRegistry::initialize(&BTreeMap::new(), &quick_options(true)).await;
        assert!(registry.is_empty());
        assert!(registry.get("filesystem").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_adapters_are_omitted() {
        let mut configs = BTreeMap::new();
        configs.insert("good".to_string(), ToolSpec::stdio("cat", Vec::<String>::new()));
        configs.insert(
            "bad".to_string(),
            ToolSpec::stdio("/nonexistent/dataflow-tool-binary", ["--serve"]),
        );

        let registry = ToolRegistry::initialize(&configs, &quick_options(false)).await;

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["good"]);
        let good = registry.get("good").expect("good adapter");
        assert_eq!(good.status().await, ToolStatus::Live);
        assert!(registry.get("bad").is_none());

        registry.shutdown().await;
        assert_eq!(good.status().await, ToolStatus::Stopped);
    }

    #[tokio::test]
    async fn unreachable_http_adapter_is_omitted() {
        let mut configs = BTreeMap::new();
        configs.insert(
            "remote".to_string(),
            ToolSpec::http("http://127.0.0.1:9/mcp"),
        );

        let registry = ToolRegistry::initialize(&configs, &quick_options(false)).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn http_handshake_caches_tools_and_calls_them() {
        let url = crate::tools::testing::serve_json_rpc().await;
        let mut configs = BTreeMap::new();
        configs.insert("warehouse".to_string(), ToolSpec::http(url.clone()));

        let registry = ToolRegistry::initialize(&configs, &quick_options(true)).await;
        let handle = registry.get("warehouse").expect("http adapter");

        let names: Vec<&str> = handle.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_table"]);
        assert_eq!(registry.specs()["warehouse"], ToolSpec::http(url));

        let output = handle
            .call_tool("read_table", json!({"table": "sales"}))
            .await
            .expect("tool call");
        assert_eq!(output, "region,sales\nnorth,10");
    }

    #[tokio::test]
    async fn http_adapter_without_handshake_is_live_once_reachable() {
        let url = crate::tools::testing::serve_json_rpc().await;
        let mut configs = BTreeMap::new();
        configs.insert("warehouse".to_string(), ToolSpec::http(url));

        let registry = ToolRegistry::initialize(&configs, &quick_options(false)).await;
        let handle = registry.get("warehouse").expect("http adapter");

        assert!(handle.tools().is_empty());
        assert_eq!(handle.status().await, ToolStatus::Live);

        registry.shutdown().await;
        assert_eq!(handle.status().await, ToolStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn adapter_that_never_answers_the_handshake_is_omitted() {
        let mut configs = BTreeMap::new();
        configs.insert(
            "silent".to_string(),
            ToolSpec::stdio("sh", ["-c", "cat > /dev/null"]),
        );

        let options = ConnectOptions {
            handshake: true,
            timeout: Duration::from_millis(300),
        };
        let registry = ToolRegistry::initialize(&configs, &options).await;
        assert!(registry.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn handshake_caches_advertised_tools_and_calls_them() {
        let registry = crate::tools::testing::scripted_registry().await;
        let handle = registry.get("filesystem").expect("scripted adapter");

        let names: Vec<&str> = handle.tools().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file"]);

        let output = handle
            .call_tool("read_file", json!({"path": "sample.csv"}))
            .await
            .expect("tool call");
        assert_eq!(output, "a,b\n1,2");

        registry.shutdown().await;
    }
}
