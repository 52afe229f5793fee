use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::capability::{AgentCapability, ChatMessage, ChatRole, Generation, InitOptions};
use crate::error::CapabilityError;
use crate::known;

/// Adapter for any OpenAI-compatible chat completions endpoint (OpenAI
/// itself, Groq, DeepSeek, local LM Studio, …).
pub struct OpenAiCompatCapability {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAiCompatCapability {
    /// Resolve an endpoint from a known id, or build a custom one.
    ///
    /// Known ids fill in base URL, chat path, and default model; for unknown
    /// ids `base_url` is required and the chat path defaults to
    /// `/v1/chat/completions`.
    pub fn resolve(
        id: &str,
        api_key: String,
        base_url: Option<String>,
        chat_path: Option<String>,
        model: Option<String>,
    ) -> Result<Self, CapabilityError> {
        let entry = known::lookup(id);
        let base = base_url
            .or_else(|| entry.map(|e| e.base_url.to_string()))
            .ok_or_else(|| {
                CapabilityError::NotConfigured(format!("unknown provider '{}' needs base_url", id))
            })?;
        let path = chat_path
            .or_else(|| entry.map(|e| e.chat_path.to_string()))
            .unwrap_or_else(|| "/v1/chat/completions".to_string());
        let model = model
            .or_else(|| entry.map(|e| e.default_model.to_string()))
            .ok_or_else(|| {
                CapabilityError::NotConfigured(format!("provider '{}' needs a model", id))
            })?;
        let provider_name = entry
            .map(|e| e.name.to_string())
            .unwrap_or_else(|| id.to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            provider_name,
            api_key,
            endpoint: format!("{}{}", base, path),
            model,
        })
    }
}

#[async_trait]
impl AgentCapability for OpenAiCompatCapability {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        // Local endpoints run keyless; a resolved endpoint is enough.
        !self.endpoint.is_empty()
    }

    async fn initialize(&self, _opts: &InitOptions) -> Result<(), CapabilityError> {
        if !self.is_configured() {
            return Err(CapabilityError::NotConfigured(format!(
                "{} endpoint missing",
                self.provider_name
            )));
        }
        // Chat paths vary across compatible providers, so there is no
        // reliable health route to probe; the first generate call surfaces
        // real failures.
        Ok(())
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<Generation, CapabilityError> {
        let turns: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": m.content })
            })
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "messages": turns,
        });

        debug!(provider = %self.provider_name, model = %self.model, "sending chat completion request");
        let started = Instant::now();

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");
        if !self.api_key.is_empty() {
            req = req.header("authorization", format!("Bearer {}", self.api_key));
        }

        let resp = req.json(&body).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CapabilityError::Unavailable(e.to_string())
            } else {
                CapabilityError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5_000);
            return Err(CapabilityError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = %self.provider_name, status, body = %text, "chat completion API error");
            return Err(CapabilityError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CapabilityError::Parse("response had no choices".to_string()))?;

        Ok(Generation {
            content,
            response_time_ms: Some(started.elapsed().as_millis() as u64),
            model: Some(api_resp.model),
        })
    }
}

// OpenAI-compatible response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}
