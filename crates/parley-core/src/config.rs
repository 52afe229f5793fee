use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18990;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParleyConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Tuning for the orchestration core. Every field has a sensible default;
/// override only what you need in `[hub]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Transcript capacity per hub; the oldest entry is evicted first.
    pub max_messages: usize,
    /// How many transcript messages an agent sees when generating.
    pub context_window: usize,
    /// Tail length inspected by the strategy selector.
    pub recent_for_strategy: usize,
    /// How many recent speakers the system prompt names.
    pub recent_for_prompt: usize,
    /// Distinct recent agents considered as spontaneous mention targets.
    pub potential_mention_targets: usize,

    /// Response shaping.
    pub max_sentences: usize,
    pub max_response_chars: usize,
    pub max_unique_mentions: usize,

    /// Agent messages allowed before the hub goes to sleep.
    pub max_agent_messages: u32,
    /// Global cap on concurrent generations.
    pub max_concurrent_responses: usize,

    /// Delay windows, all in milliseconds.
    pub min_user_delay_ms: u64,
    pub max_user_delay_ms: u64,
    pub min_background_delay_ms: u64,
    pub max_background_delay_ms: u64,
    pub min_between_ms: u64,
    pub max_between_ms: u64,
    pub min_first_ms: u64,
    pub max_first_ms: u64,
    pub min_mentioned_ms: u64,
    pub mentioned_multiplier: f64,
    pub typing_awareness_delay_ms: u64,
    pub typing_awareness_max_mult: f64,

    /// Background loop timing.
    pub silence_timeout_ms: u64,
    pub sleep_retry_ms: u64,

    /// Response queue retry when blocked by capacity or sleep.
    pub queue_retry_ms: u64,
    /// Broker yield between deliveries.
    pub processing_quantum_ms: u64,
    /// Broker capacity; overflow drops the message.
    pub max_queue: usize,
    /// Concurrent capability initializations at startup.
    pub max_parallel_init: usize,

    pub random_mention_probability: f64,
    /// Chance per background tick of rotating to a topic from `topics`.
    pub topic_change_chance: f64,
    /// Rotation topics for the background loop. Empty disables rotation.
    pub topics: Vec<String>,

    pub enable_personas: bool,
    /// Skip capability validation at registry init.
    pub skip_healthcheck: bool,
    pub verbose_context_logging: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            context_window: 50,
            recent_for_strategy: 8,
            recent_for_prompt: 5,
            potential_mention_targets: 3,
            max_sentences: 15,
            max_response_chars: 1000,
            max_unique_mentions: 3,
            max_agent_messages: 10,
            max_concurrent_responses: 2,
            min_user_delay_ms: 4_000,
            max_user_delay_ms: 22_000,
            min_background_delay_ms: 30_000,
            max_background_delay_ms: 90_000,
            min_between_ms: 6_000,
            max_between_ms: 18_000,
            min_first_ms: 2_500,
            max_first_ms: 4_500,
            min_mentioned_ms: 400,
            mentioned_multiplier: 0.35,
            typing_awareness_delay_ms: 2_500,
            typing_awareness_max_mult: 3.0,
            silence_timeout_ms: 120_000,
            sleep_retry_ms: 30_000,
            queue_retry_ms: 1_000,
            processing_quantum_ms: 10,
            max_queue: 1_000,
            max_parallel_init: 8,
            random_mention_probability: 0.35,
            topic_change_chance: 0.10,
            topics: Vec::new(),
            enable_personas: false,
            skip_healthcheck: false,
            verbose_context_logging: false,
        }
    }
}

/// One agent seat in the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Stable identifier, also the default alias.
    pub id: String,
    /// Provider key: "anthropic", "ollama", or an OpenAI-compatible entry id.
    pub provider: String,
    /// Model override; falls back to the provider's default.
    pub model: Option<String>,
    /// Defaults to "<provider name> <model>".
    pub display_name: Option<String>,
    /// Handle users type to address this agent. Defaults to the id.
    pub alias: Option<String>,
    pub emoji: Option<String>,
    /// Free-text persona, injected only when `hub.enable_personas` is set.
    pub persona: Option<String>,
    #[serde(default = "bool_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub ollama: Option<OllamaConfig>,
    /// OpenAI-compatible providers, addressed by entry id. Well-known ids
    /// resolve their endpoint automatically; custom ids need `base_url`.
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    pub id: String,
    pub api_key: String,
    /// Required for ids that are not in the known-endpoint table.
    pub base_url: Option<String>,
    pub chat_path: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistoryConfig {
    /// SQLite file for room history. Unset means memory-only.
    pub path: Option<String>,
}

fn bool_true() -> bool {
    true
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_anthropic_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_ollama_model() -> String {
    "llama3.1".to_string()
}

impl ParleyConfig {
    /// Load config from a TOML file with PARLEY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ParleyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PARLEY_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.parley/parley.toml", home)
}
