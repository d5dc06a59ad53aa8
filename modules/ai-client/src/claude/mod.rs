mod client;
pub(crate) mod types;

pub use types::Usage;

use anyhow::anyhow;

use client::ClaudeClient;
use types::*;

use crate::error::AiError;
use crate::retry::{with_retry, RetryPolicy};
use crate::traits::StructuredOutput;

// =============================================================================
// Claude Agent
// =============================================================================

/// Structured output from a forced tool call, with token accounting.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub value: T,
    pub usage: Usage,
}

/// Plain-text completion with token accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
    retry: RetryPolicy,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> anyhow::Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .map_err(|_| anyhow!("LLM_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    /// Force the model through a tool whose input schema is `T`, and return
    /// the validated value. Transient failures are retried with backoff.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<Extraction<T>, AiError> {
        let schema = T::output_schema();
        let system = system_prompt.into();
        let user = user_prompt.into();

        let tool_name = "record_extraction";
        let response = with_retry("extract", self.retry, || {
            let mut request = ChatRequest::new(&self.model)
                .system(system.clone())
                .message(WireMessage::user(user.clone()))
                .temperature(0.0)
                .tool(ToolDefinitionWire {
                    name: tool_name.to_string(),
                    description: "Record structured data extracted from the input.".to_string(),
                    input_schema: schema.clone(),
                });
            request.tool_choice = Some(serde_json::json!({
                "type": "tool",
                "name": tool_name,
            }));
            let client = self.client();
            async move { client.chat(&request).await }
        })
        .await?;

        let usage = response.usage();
        let input = response
            .tool_input(tool_name)
            .ok_or_else(|| AiError::Malformed("no structured output in response".to_string()))?;

        let value = serde_json::from_value(input.clone())
            .map_err(|e| AiError::Malformed(format!("failed to deserialize tool input: {e}")))?;

        Ok(Extraction { value, usage })
    }

    /// Plain chat completion at temperature 0.
    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Completion, AiError> {
        let system = system.into();
        let user = user.into();

        let response = with_retry("chat_completion", self.retry, || {
            let request = ChatRequest::new(&self.model)
                .system(system.clone())
                .message(WireMessage::user(user.clone()))
                .max_tokens(4096)
                .temperature(0.0);
            let client = self.client();
            async move { client.chat(&request).await }
        })
        .await?;

        let usage = response.usage();
        let text = response
            .text()
            .ok_or_else(|| AiError::Malformed("no text in response".to_string()))?;

        Ok(Completion { text, usage })
    }
}
