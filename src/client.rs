//! Completion service boundary.
//!
//! The router talks to a [`CompletionClient`] trait object so tests can
//! substitute a scripted double. The real implementation speaks the
//! OpenAI-compatible chat completions protocol against either a cloud
//! endpoint or a local inference server, selected per model id.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Prefix marking a model as served by the local inference endpoint.
pub const LOCAL_MODEL_PREFIX: &str = "ollama/";

/// One request to the completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Abstraction over the completion service for testability.
/// Real implementation: [`HttpCompletionClient`]. Test double: a scripted
/// queue of canned responses.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one blocking completion. Any transport or provider failure is
    /// reported uniformly as an error of this call.
    async fn complete(&self, req: &CompletionRequest) -> Result<String>;

    /// One-shot reachability check of the local inference endpoint.
    async fn probe_local(&self) -> bool;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// HTTP client for OpenAI-style chat completion endpoints.
pub struct HttpCompletionClient {
    http: reqwest::Client,
    cloud_base_url: String,
    local_base_url: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    pub fn new(cloud_base_url: &str, local_base_url: &str, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            http,
            cloud_base_url: cloud_base_url.trim_end_matches('/').to_string(),
            local_base_url: local_base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Resolve (endpoint URL, wire model id) for a roster model id.
    fn route(&self, model: &str) -> (String, String) {
        if let Some(local_model) = model.strip_prefix(LOCAL_MODEL_PREFIX) {
            (
                format!("{}/v1/chat/completions", self.local_base_url),
                local_model.to_string(),
            )
        } else {
            (
                format!("{}/chat/completions", self.cloud_base_url),
                model.to_string(),
            )
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, req: &CompletionRequest) -> Result<String> {
        let (url, wire_model) = self.route(&req.model);
        debug!(model = %req.model, url = %url, "dispatching completion");

        let body = ChatRequest {
            model: &wire_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &req.system,
                },
                ChatMessage {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let mut request = self.http.post(&url).json(&body);
        if !req.model.starts_with(LOCAL_MODEL_PREFIX)
            && let Some(key) = &self.api_key
        {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Completion request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Completion endpoint returned {}: {}",
                status,
                detail
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse completion response")?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Completion response contained no choices"))
    }

    async fn probe_local(&self) -> bool {
        match self
            .http
            .get(&self.local_base_url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
