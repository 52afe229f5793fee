use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::capability::{AgentCapability, ChatMessage, ChatRole, Generation, InitOptions};
use crate::error::CapabilityError;

pub struct OllamaCapability {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaCapability {
    pub fn new(base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
        }
    }
}

#[async_trait]
impl AgentCapability for OllamaCapability {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        // No credentials; a base URL is all the local daemon needs.
        !self.base_url.is_empty()
    }

    async fn initialize(&self, opts: &InitOptions) -> Result<(), CapabilityError> {
        if !opts.validate {
            return Ok(());
        }
        // Ping the local daemon so a missing Ollama excludes the agent at
        // startup instead of erroring on every round.
        let url = format!("{}/api/tags", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CapabilityError::Unavailable(e.to_string())
            } else {
                CapabilityError::Http(e)
            }
        })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::Api {
                status,
                message: text,
            });
        }
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
            "stream": false,
        });
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %self.model, "sending request to Ollama");
        let started = Instant::now();

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Surface connection errors as Unavailable so the caller can
                // treat the local daemon as absent.
                if e.is_connect() || e.is_timeout() {
                    CapabilityError::Unavailable(e.to_string())
                } else {
                    CapabilityError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(CapabilityError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(e.to_string()))?;

        Ok(Generation {
            content: api_resp.message.content,
            response_time_ms: Some(started.elapsed().as_millis() as u64),
            model: Some(api_resp.model),
        })
    }
}

// Ollama API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    message: OllamaMessage,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}
