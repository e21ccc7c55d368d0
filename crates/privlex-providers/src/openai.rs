//! Azure OpenAI chat-completion and embedding deployments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use privlex_agents::{BackendError, ChatModel, Embedder, PromptMessage};
use privlex_core::config::{ChatModelConfig, EmbeddingModelConfig};

use crate::http::{build_client, join_url, read_json, transport_error};

fn deployment_url(endpoint: &str, deployment: &str, operation: &str) -> String {
    join_url(
        endpoint,
        &format!("openai/deployments/{deployment}/{operation}"),
    )
}

// =============================================================================
// Chat
// =============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model backed by an Azure OpenAI deployment.
pub struct AzureChatModel {
    client: Client,
    url: String,
    api_key: String,
    api_version: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl AzureChatModel {
    pub fn new(config: &ChatModelConfig, timeout: Duration) -> Result<Self, BackendError> {
        if !config.is_configured() {
            return Err(BackendError::NotConfigured(
                "chat model endpoint and deployment are required".to_string(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            url: deployment_url(&config.endpoint, &config.deployment, "chat/completions"),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for AzureChatModel {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, BackendError> {
        let body = ChatRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let parsed: ChatResponse = read_json(response, self.timeout).await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("no completion choices".to_string()))?;

        debug!(chars = content.len(), "chat completion received");
        Ok(content)
    }
}

// =============================================================================
// Embeddings
// =============================================================================

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// Embedding model backed by an Azure OpenAI deployment.
pub struct AzureEmbedder {
    client: Client,
    url: String,
    api_key: String,
    api_version: String,
    timeout: Duration,
}

impl AzureEmbedder {
    pub fn new(config: &EmbeddingModelConfig, timeout: Duration) -> Result<Self, BackendError> {
        if !config.is_configured() {
            return Err(BackendError::NotConfigured(
                "embedding endpoint and deployment are required".to_string(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            url: deployment_url(&config.endpoint, &config.deployment, "embeddings"),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for AzureEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("api-version", self.api_version.as_str())])
            .header("api-key", &self.api_key)
            .json(&EmbedRequest { input: text })
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let parsed: EmbedResponse = read_json(response, self.timeout).await?;
        match parsed.data.into_iter().next() {
            Some(data) if !data.embedding.is_empty() => Ok(data.embedding),
            _ => Err(BackendError::InvalidResponse(
                "no embedding in response".to_string(),
            )),
        }
    }
}
