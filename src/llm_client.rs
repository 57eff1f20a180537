use std::sync::Arc;

use anyhow::Context;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use tracing::instrument;

use crate::config::LlmConfig;

pub type SharedLlmClient = Arc<dyn LlmClient>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> anyhow::Result<String>;
}

/// OpenAI-compatible client; by default it points at a local Ollama server's `/v1` API.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiLlmClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.clone());

        Self {
            client: AsyncOpenAiClient::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    pub fn shared(config: &LlmConfig) -> SharedLlmClient {
        Arc::new(Self::from_config(config))
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn chat(&self, system_prompt: &str, prompt: &str) -> anyhow::Result<String> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_prompt)
            .build()?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(vec![system_message.into(), user_message.into()])
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .with_context(|| format!("LLM request to model {} failed", self.model))?;
        let choice = response
            .choices
            .first()
            .context("LLM response did not contain any choices")?;

        let output = choice
            .message
            .content
            .clone()
            .unwrap_or_else(|| String::from("[empty LLM response]"));

        Ok(output)
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> anyhow::Result<String> {
        self.chat(system_prompt, prompt).await
    }
}
