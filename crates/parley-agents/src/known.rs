//! Known OpenAI-compatible endpoints, so agents can be configured by id
//! alone without looking up provider URLs.

/// An OpenAI-compatible provider with a well-known endpoint.
pub struct KnownEndpoint {
    /// Short identifier used in config (e.g. "groq").
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Base URL without trailing slash.
    pub base_url: &'static str,
    /// Path appended to `base_url` for chat completions.
    pub chat_path: &'static str,
    /// Model used when the agent entry does not name one.
    pub default_model: &'static str,
}

impl KnownEndpoint {
    /// Full chat completions URL.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }
}

pub const KNOWN_ENDPOINTS: &[KnownEndpoint] = &[
    KnownEndpoint {
        id: "groq",
        name: "Groq",
        base_url: "https://api.groq.com/openai",
        chat_path: "/v1/chat/completions",
        default_model: "llama-3.3-70b-versatile",
    },
    KnownEndpoint {
        id: "deepseek",
        name: "DeepSeek",
        base_url: "https://api.deepseek.com",
        chat_path: "/v1/chat/completions",
        default_model: "deepseek-chat",
    },
    KnownEndpoint {
        id: "openrouter",
        name: "OpenRouter",
        base_url: "https://openrouter.ai/api",
        chat_path: "/v1/chat/completions",
        default_model: "openai/gpt-4o",
    },
    KnownEndpoint {
        id: "openai",
        name: "OpenAI",
        base_url: "https://api.openai.com",
        chat_path: "/v1/chat/completions",
        default_model: "gpt-4o-mini",
    },
    KnownEndpoint {
        id: "xai",
        name: "xAI (Grok)",
        base_url: "https://api.x.ai",
        chat_path: "/v1/chat/completions",
        default_model: "grok-2-latest",
    },
    KnownEndpoint {
        id: "mistral",
        name: "Mistral AI",
        base_url: "https://api.mistral.ai",
        chat_path: "/v1/chat/completions",
        default_model: "mistral-large-latest",
    },
    KnownEndpoint {
        id: "together",
        name: "Together AI",
        base_url: "https://api.together.xyz",
        chat_path: "/v1/chat/completions",
        default_model: "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
    },
    KnownEndpoint {
        id: "gemini",
        name: "Google AI (Gemini)",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        chat_path: "/chat/completions",
        default_model: "gemini-2.0-flash",
    },
    KnownEndpoint {
        id: "lmstudio",
        name: "LM Studio (local)",
        base_url: "http://localhost:1234",
        chat_path: "/v1/chat/completions",
        default_model: "local-model",
    },
    KnownEndpoint {
        id: "litellm",
        name: "LiteLLM proxy",
        base_url: "http://localhost:4000",
        chat_path: "/v1/chat/completions",
        default_model: "gpt-4o-mini",
    },
];

/// Look up a known endpoint by its id.
pub fn lookup(id: &str) -> Option<&'static KnownEndpoint> {
    KNOWN_ENDPOINTS.iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_known_ids() {
        let groq = lookup("groq").unwrap();
        assert_eq!(groq.endpoint(), "https://api.groq.com/openai/v1/chat/completions");
        assert!(lookup("not-a-provider").is_none());
    }

    #[test]
    fn ids_are_unique() {
        for (i, a) in KNOWN_ENDPOINTS.iter().enumerate() {
            for b in &KNOWN_ENDPOINTS[i + 1..] {
                assert_ne!(a.id, b.id);
            }
        }
    }
}
