use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::agents::AgentDefinition;
use crate::llm_client::SharedLlmClient;
use crate::tasks::TaskSpec;

use super::engine::{CrewEngine, CrewOutput, CrewSettings};
use super::session::OrchestrationSession;

const DELEGATE: &str = "DELEGATE";
const TOOL_CALL: &str = "TOOL_CALL";
const MEMORY_CAPACITY: usize = 6;

#[derive(Debug, Clone, Deserialize)]
struct Delegation {
    role: String,
    task: String,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolCall {
    adapter: String,
    tool: String,
    #[serde(default = "empty_arguments")]
    arguments: Value,
}

fn empty_arguments() -> Value {
    json!({})
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    request: String,
    answer: String,
}

/// LLM-driven hierarchical backend. The coordinator either answers or emits a
/// `DELEGATE {...}` line; specialists either answer or emit a `TOOL_CALL {...}` line.
pub struct HierarchicalLlmEngine {
    llm_client: SharedLlmClient,
    last_request: Mutex<Option<Instant>>,
    memory: StdMutex<VecDeque<MemoryEntry>>,
}

impl HierarchicalLlmEngine {
    pub fn new(llm_client: SharedLlmClient) -> Self {
        Self {
            llm_client,
            last_request: Mutex::new(None),
            memory: StdMutex::new(VecDeque::with_capacity(MEMORY_CAPACITY)),
        }
    }

    async fn complete(
        &self,
        settings: &CrewSettings,
        system_prompt: &str,
        prompt: &str,
    ) -> anyhow::Result<String> {
        self.throttle(settings.max_rpm).await;
        let reply = self.llm_client.complete(system_prompt, prompt).await?;
        Ok(strip_reasoning(&reply))
    }

    async fn throttle(&self, max_rpm: Option<u32>) {
        let Some(rpm) = max_rpm.filter(|rpm| *rpm > 0) else {
            return;
        };
        let interval = Duration::from_secs(60) / rpm;

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                let wait = interval - elapsed;
                debug!(?wait, "Spacing model requests to honor max_rpm");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn coordinator_prompt(&self, session: &OrchestrationSession, task: &TaskSpec) -> String {
        let mut prompt = String::new();

        if session.settings().memory {
            if let Some(recent) = self.render_memory() {
                prompt.push_str(&recent);
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str("Task:\n");
        prompt.push_str(task.description().trim());
        prompt.push_str("\n\nExpected output:\n");
        prompt.push_str(task.expected_output().trim());
        prompt.push_str("\n\nYour coworkers:\n");
        for specialist in session.roster().specialists() {
            prompt.push_str(&format!("- {}: {}", specialist.role(), specialist.goal()));
            if !specialist.tool_names().is_empty() {
                let tools: Vec<&str> = specialist.tool_names().iter().map(String::as_str).collect();
                prompt.push_str(&format!(" (tools: {})", tools.join(", ")));
            }
            prompt.push('\n');
        }
        prompt.push_str(
            "\nTo delegate work, reply with exactly one line:\n\
             DELEGATE {\"role\": \"<coworker role>\", \"task\": \"<what they should do>\", \"context\": \"<everything they need to know>\"}\n\
             The coworker's answer comes back to you as an observation. When you have what you need, \
             reply with the final answer only and no DELEGATE line.",
        );

        prompt
    }

    fn specialist_prompt(
        &self,
        session: &OrchestrationSession,
        specialist: &AgentDefinition,
        delegation: &Delegation,
    ) -> String {
        let mut prompt = format!(
            "Task from the {}:\n{}",
            session.roster().coordinator().role(),
            delegation.task.trim()
        );

        if let Some(context) = delegation
            .context
            .as_deref()
            .map(str::trim)
            .filter(|context| !context.is_empty())
        {
            prompt.push_str("\n\nContext:\n");
            prompt.push_str(context);
        }

        if !specialist.tool_names().is_empty() {
            prompt.push_str("\n\nAvailable tools:\n");
            for adapter in specialist.tool_names() {
                match session.tools().get(adapter) {
                    Some(handle) if !handle.tools().is_empty() => {
                        for tool in handle.tools() {
                            prompt.push_str(&format!(
                                "- adapter \"{adapter}\", tool \"{}\": {}\n",
                                tool.name, tool.description
                            ));
                        }
                    }
                    _ => prompt.push_str(&format!(
                        "- adapter \"{adapter}\" (tool list unavailable)\n"
                    )),
                }
            }
            prompt.push_str(
                "To use a tool, reply with exactly one line:\n\
                 TOOL_CALL {\"adapter\": \"<adapter>\", \"tool\": \"<tool>\", \"arguments\": {}}\n\
                 The tool output comes back as an observation.",
            );
        }

        prompt.push_str("\n\nWhen you are done, reply with your complete answer.");
        prompt
    }

    #[instrument(skip_all, fields(role = %specialist.role()))]
    async fn run_specialist(
        &self,
        session: &OrchestrationSession,
        specialist: &AgentDefinition,
        delegation: &Delegation,
    ) -> anyhow::Result<String> {
        let settings = session.settings();
        let system_prompt = specialist.system_prompt();
        let mut prompt = self.specialist_prompt(session, specialist, delegation);

        for _ in 0..settings.max_iter {
            let reply = self.complete(settings, &system_prompt, &prompt).await?;

            let observation = match parse_directive::<ToolCall>(&reply, TOOL_CALL) {
                None => return Ok(reply.trim().to_string()),
                Some(Err(err)) => format!("Malformed TOOL_CALL directive: {err}"),
                Some(Ok(call)) => self.invoke_tool(session, specialist, &call).await,
            };

            prompt.push_str(&format!(
                "\n\nYour previous reply:\n{}\n\nObservation:\n{observation}",
                reply.trim()
            ));
        }

        bail!(
            "{} exceeded {} iterations without an answer",
            specialist.role(),
            settings.max_iter
        )
    }

    async fn invoke_tool(
        &self,
        session: &OrchestrationSession,
        specialist: &AgentDefinition,
        call: &ToolCall,
    ) -> String {
        if !specialist.has_tool(&call.adapter) {
            return format!(
                "Adapter '{}' is not available to the {}.",
                call.adapter,
                specialist.role()
            );
        }

        let Some(handle) = session.tools().get(&call.adapter) else {
            return format!("Adapter '{}' is not connected.", call.adapter);
        };

        info!(adapter = %call.adapter, tool = %call.tool, "Specialist invoking tool");
        match handle.call_tool(&call.tool, call.arguments.clone()).await {
            Ok(output) => output,
            Err(err) => {
                warn!(adapter = %call.adapter, tool = %call.tool, error = %err, "Tool call failed");
                format!("Tool call failed: {err}")
            }
        }
    }

    fn render_memory(&self) -> Option<String> {
        let memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        if memory.is_empty() {
            return None;
        }

        let mut lines = vec![String::from("Recent conversation:")];
        for entry in memory.iter() {
            lines.push(format!("- Request: {}", entry.request));
            lines.push(format!("  Answer: {}", entry.answer));
        }
        Some(lines.join("\n"))
    }

    fn remember(&self, task: &TaskSpec, answer: &str) {
        let request = task
            .description()
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();

        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        if memory.len() >= MEMORY_CAPACITY {
            memory.pop_front();
        }
        memory.push_back(MemoryEntry {
            request: truncate(request, 200),
            answer: truncate(answer.trim(), 400),
        });
    }
}

#[async_trait]
impl CrewEngine for HierarchicalLlmEngine {
    #[instrument(skip_all, fields(mode = %task.mode()))]
    async fn kickoff(
        &self,
        session: &OrchestrationSession,
        task: &TaskSpec,
    ) -> anyhow::Result<CrewOutput> {
        let settings = session.settings();
        let roster = session.roster();
        let system_prompt = roster.coordinator().system_prompt();
        let mut prompt = self.coordinator_prompt(session, task);
        let mut delegations = Vec::new();

        for iteration in 1..=settings.max_iter {
            let reply = self.complete(settings, &system_prompt, &prompt).await?;

            let observation = match parse_directive::<Delegation>(&reply, DELEGATE) {
                None => {
                    let answer = reply.trim().to_string();
                    if settings.memory {
                        self.remember(task, &answer);
                    }
                    return Ok(CrewOutput::structured(answer).with_metadata(json!({
                        "process": session.process().to_string(),
                        "mode": task.mode().to_string(),
                        "iterations": iteration,
                        "delegations": delegations,
                    })));
                }
                Some(Err(err)) => format!("Malformed DELEGATE directive: {err}"),
                Some(Ok(delegation)) => match roster.find(&delegation.role) {
                    Some(specialist) if !specialist.can_delegate() => {
                        info!(role = %specialist.role(), "Coordinator delegated work");
                        delegations.push(json!({
                            "role": specialist.role(),
                            "task": delegation.task.clone(),
                        }));
                        let answer = self.run_specialist(session, specialist, &delegation).await?;
                        format!("Observation from {}:\n{answer}", specialist.role())
                    }
                    _ => {
                        let available: Vec<&str> = roster
                            .specialists()
                            .iter()
                            .map(AgentDefinition::role)
                            .collect();
                        format!(
                            "No coworker named '{}'. Available coworkers: {}.",
                            delegation.role,
                            available.join(", ")
                        )
                    }
                },
            };

            prompt.push_str(&format!(
                "\n\nYour previous reply:\n{}\n\n{observation}",
                reply.trim()
            ));
        }

        bail!(
            "coordinator exceeded {} iterations without a final answer",
            settings.max_iter
        )
    }
}

/// Find `PREFIX {json}` in a model reply and decode the first JSON value after it.
fn parse_directive<T: DeserializeOwned>(
    reply: &str,
    prefix: &str,
) -> Option<Result<T, serde_json::Error>> {
    reply.match_indices(prefix).find_map(|(idx, _)| {
        let tail = reply[idx + prefix.len()..].trim_start();
        tail.starts_with('{')
            .then(|| serde_json::Deserializer::from_str(tail).into_iter::<T>().next())
            .flatten()
    })
}

/// Drop `<think>...</think>` blocks emitted by reasoning models.
fn strip_reasoning(reply: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut rest = reply;
    let mut kept = String::with_capacity(reply.len());
    while let Some(start) = rest.find(OPEN) {
        kept.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    kept.push_str(rest);
    kept.trim().to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Roster;
    use crate::llm_client::LlmClient;
    use crate::tasks::{render_chat_task, render_pipeline_task};
    use crate::tools::ToolRegistry;
    use anyhow::anyhow;
    use std::sync::Arc;

    #[derive(Default)]
    struct ScriptedLlm {
        replies: StdMutex<VecDeque<String>>,
        calls: StdMutex<Vec<(String, String)>>,
    }

    impl ScriptedLlm {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.iter().map(|r| r.to_string()).collect()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, system_prompt: &str, prompt: &str) -> anyhow::Result<String> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((system_prompt.to_string(), prompt.to_string()));
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .ok_or_else(|| anyhow!("script exhausted"))
        }
    }

    fn settings(max_iter: u32, memory: bool) -> CrewSettings {
        CrewSettings {
            max_iter,
            max_rpm: None,
            memory,
        }
    }

    fn session_with(
        llm: Arc<ScriptedLlm>,
        tools: Arc<ToolRegistry>,
        settings: CrewSettings,
    ) -> OrchestrationSession {
        let engine = Arc::new(HierarchicalLlmEngine::new(llm));
        OrchestrationSession::compose(Roster::build(&tools), tools, engine, settings)
    }

    #[tokio::test]
    async fn direct_answers_skip_delegation() {
        let llm = ScriptedLlm::new(&["I coordinate a team of data specialists."]);
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), settings(5, false));

        let output = session
            .kickoff(render_chat_task("What is your purpose?"))
            .await
            .expect("answer");

        assert_eq!(output.raw(), Some("I coordinate a team of data specialists."));
        let metadata = output.metadata().expect("metadata");
        assert_eq!(metadata["iterations"], 1);
        assert_eq!(metadata["delegations"], json!([]));

        let calls = llm.calls();
        assert!(calls[0]
            .0
            .starts_with("You are the Senior Project Manager & Technical Coordinator."));
        assert!(calls[0].1.contains("User request: What is your purpose?"));
        assert!(calls[0].1.contains("DELEGATE {"));
    }

    #[tokio::test]
    async fn coordinator_delegates_and_compiles_the_answer() {
        let llm = ScriptedLlm::new(&[
            r#"Let me involve the analyst.
DELEGATE {"role": "Data Analysis Specialist", "task": "Summarize the table", "context": "a,b; 1,2"}"#,
            "Column b has a single value: 2.",
            "Final: b averages 2.",
        ]);
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), settings(5, false));

        let output = session
            .kickoff(render_chat_task("Analyze this table: a,b; 1,2"))
            .await
            .expect("delegated answer");

        assert_eq!(output.raw(), Some("Final: b averages 2."));
        let metadata = output.metadata().expect("metadata");
        assert_eq!(metadata["delegations"][0]["role"], "Data Analysis Specialist");
        assert_eq!(metadata["iterations"], 2);

        let calls = llm.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].0.starts_with("You are the Data Analysis Specialist."));
        assert!(calls[1].1.contains("Summarize the table"));
        assert!(calls[1].1.contains("Context:\na,b; 1,2"));
        assert!(calls[2]
            .1
            .contains("Observation from Data Analysis Specialist:\nColumn b has a single value: 2."));
    }

    #[tokio::test]
    async fn max_rpm_spaces_consecutive_model_requests() {
        let llm = ScriptedLlm::new(&[
            r#"DELEGATE {"role": "Data Analysis Specialist", "task": "Summarize the table"}"#,
            "Column b averages 2.",
            "Final: b averages 2.",
        ]);
        let throttled = CrewSettings {
            max_rpm: Some(600),
            ..settings(5, false)
        };
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), throttled);

        let started = Instant::now();
        session
            .kickoff(render_chat_task("Analyze this table: a,b; 1,2"))
            .await
            .expect("throttled answer");

        // 600 rpm leaves 100ms between requests; three requests need two gaps.
        assert_eq!(llm.calls().len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn unknown_coworkers_are_reported_back() {
        let llm = ScriptedLlm::new(&[
            r#"DELEGATE {"role": "Chief Data Officer", "task": "Decide"}"#,
            "I will answer myself.",
        ]);
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), settings(5, false));

        let output = session
            .kickoff(render_chat_task("Decide for me"))
            .await
            .expect("answer");
        assert_eq!(output.raw(), Some("I will answer myself."));

        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1.contains("No coworker named 'Chief Data Officer'"));
        assert!(calls[1].1.contains("Technical Report Writer"));
    }

    #[tokio::test]
    async fn malformed_directives_are_reported_back() {
        let llm = ScriptedLlm::new(&[r#"DELEGATE {"role": 42}"#, "Recovered."]);
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), settings(5, false));

        let output = session
            .kickoff(render_chat_task("hello"))
            .await
            .expect("answer");
        assert_eq!(output.raw(), Some("Recovered."));
        assert!(llm.calls()[1].1.contains("Malformed DELEGATE directive"));
    }

    #[tokio::test]
    async fn exceeding_max_iter_fails_the_turn() {
        let delegate =
            r#"DELEGATE {"role": "Technical Report Writer", "task": "Write it", "context": ""}"#;
        let llm = ScriptedLlm::new(&[delegate, "draft one", delegate, "draft two"]);
        let session = session_with(llm, Arc::new(ToolRegistry::empty()), settings(2, false));

        let err = session
            .kickoff(render_pipeline_task("sales.csv"))
            .await
            .expect_err("iteration cap");
        assert!(err.to_string().contains("exceeded 2 iterations"));
    }

    #[tokio::test]
    async fn llm_failures_propagate() {
        let llm = ScriptedLlm::new(&[]);
        let session = session_with(llm, Arc::new(ToolRegistry::empty()), settings(5, false));

        let err = session
            .kickoff(render_chat_task("hello"))
            .await
            .expect_err("exhausted script");
        assert_eq!(err.to_string(), "script exhausted");
    }

    #[tokio::test]
    async fn memory_carries_earlier_answers_forward() {
        let llm = ScriptedLlm::new(&["Sales grew 20%.", "As noted, sales grew 20%."]);
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), settings(5, true));

        session
            .submit(render_chat_task("How did sales do?"))
            .await
            .expect("first turn");
        session
            .submit(render_chat_task("Remind me?"))
            .await
            .expect("second turn");

        let calls = llm.calls();
        assert!(!calls[0].1.contains("Recent conversation:"));
        assert!(calls[1].1.starts_with("Recent conversation:"));
        assert!(calls[1].1.contains("- Request: User request: How did sales do?"));
        assert!(calls[1].1.contains("  Answer: Sales grew 20%."));
    }

    #[tokio::test]
    async fn unbound_adapters_are_refused() {
        let llm = ScriptedLlm::new(&[
            r#"DELEGATE {"role": "Technical Report Writer", "task": "Peek at the file"}"#,
            r#"TOOL_CALL {"adapter": "filesystem", "tool": "read_file", "arguments": {"path": "x.csv"}}"#,
            "I cannot read files; here is a template report.",
            "Here is a template report.",
        ]);
        let session = session_with(llm.clone(), Arc::new(ToolRegistry::empty()), settings(5, false));

        session
            .kickoff(render_chat_task("Generate a report"))
            .await
            .expect("answer");
        assert!(llm.calls()[2]
            .1
            .contains("Adapter 'filesystem' is not available to the Technical Report Writer."));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn specialists_call_their_bound_adapters() {
        let tools = Arc::new(crate::tools::testing::scripted_registry().await);
        let llm = ScriptedLlm::new(&[
            r#"DELEGATE {"role": "Data Ingestion Specialist", "task": "Load sample.csv"}"#,
            r#"TOOL_CALL {"adapter": "filesystem", "tool": "read_file", "arguments": {"path": "sample.csv"}}"#,
            "Loaded one row with columns a and b.",
            "The file has one row with columns a and b.",
        ]);
        let session = session_with(llm.clone(), tools.clone(), settings(5, false));

        let output = session
            .kickoff(render_chat_task("Load my data"))
            .await
            .expect("answer");
        assert_eq!(
            output.raw(),
            Some("The file has one row with columns a and b.")
        );

        let calls = llm.calls();
        assert!(calls[1].1.contains("adapter \"filesystem\", tool \"read_file\""));
        assert!(calls[2].1.contains("Observation:\na,b\n1,2"));

        tools.shutdown().await;
    }

    #[test]
    fn reasoning_blocks_are_stripped() {
        assert_eq!(
            strip_reasoning("<think>maybe DELEGATE {\"role\": \"x\"}</think>\nHello"),
            "Hello"
        );
        assert_eq!(strip_reasoning("no tags here"), "no tags here");
        assert_eq!(strip_reasoning("answer<think>unterminated"), "answer");
    }

    #[test]
    fn directives_need_a_json_object() {
        let parsed: Option<Result<Delegation, _>> =
            parse_directive("I may DELEGATE later, not now.", DELEGATE);
        assert!(parsed.is_none());

        let parsed: Delegation = parse_directive(
            r#"DELEGATE {"role": "Data Quality Engineer", "task": "dedupe"} trailing text"#,
            DELEGATE,
        )
        .expect("directive")
        .expect("valid json");
        assert_eq!(parsed.role, "Data Quality Engineer");
        assert!(parsed.context.is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
    }
}
