use async_trait::async_trait;
use serde::Serialize;

use crate::error::CapabilityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of the conversation as sent to a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Result of one generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub content: String,
    pub response_time_ms: Option<u64>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct InitOptions {
    /// When false, initialization only checks local configuration and skips
    /// any remote validation.
    pub validate: bool,
}

/// Uniform interface over pluggable text-generation endpoints.
///
/// Errors surface to the orchestrator as `agent-error` events; this is the
/// only agent-side failure mode the core observes. Capabilities enforce
/// their own timeouts.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Provider display name for logs and default agent names.
    fn name(&self) -> &str;

    /// Model identifier requests are routed to.
    fn model(&self) -> &str;

    /// Whether local configuration (credentials, endpoint) is present.
    fn is_configured(&self) -> bool;

    /// Prepare the capability. With `validate` set this may perform a remote
    /// health check; failures exclude the agent from the registry.
    async fn initialize(&self, opts: &InitOptions) -> Result<(), CapabilityError>;

    /// Produce a reply for the prepared conversation.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<Generation, CapabilityError>;
}
