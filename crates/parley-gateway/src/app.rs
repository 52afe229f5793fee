use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tracing::{info, warn};

use parley_agents::anthropic::AnthropicCapability;
use parley_agents::ollama::OllamaCapability;
use parley_agents::openai::OpenAiCompatCapability;
use parley_agents::{AgentCapability, AgentDefinition, AgentRegistry};
use parley_core::config::{AgentEntry, ParleyConfig, ProvidersConfig};
use parley_core::HistorySink;
use parley_hub::Orchestrator;
use parley_memory::SqliteHistory;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ParleyConfig,
    pub orchestrator: Arc<Orchestrator>,
}

/// Build capabilities for every configured agent, initialize the registry,
/// and start the orchestrator.
pub async fn build_state(config: ParleyConfig) -> anyhow::Result<Arc<AppState>> {
    let registry = Arc::new(AgentRegistry::new());

    let mut definitions = Vec::new();
    for entry in &config.agents {
        match build_capability(entry, &config.providers) {
            Ok((capability, model_key)) => definitions.push(AgentDefinition {
                id: entry.id.clone(),
                provider_key: entry.provider.clone(),
                model_key,
                display_name: entry.display_name.clone(),
                alias: entry.alias.clone(),
                emoji: entry.emoji.clone(),
                persona: entry.persona.clone(),
                active: entry.active,
                capability,
            }),
            Err(reason) => {
                warn!(agent_id = %entry.id, %reason, "skipping agent with unusable provider config");
            }
        }
    }

    let registered = registry
        .initialize(
            definitions,
            config.hub.max_parallel_init,
            config.hub.skip_healthcheck,
        )
        .await;
    info!(agents = registered, "agent registry ready");

    let history: Option<Arc<dyn HistorySink>> = match &config.history.path {
        Some(path) => match SqliteHistory::open(Path::new(path)) {
            Ok(h) => Some(Arc::new(h)),
            Err(e) => {
                warn!(error = %e, "history store unavailable, running memory-only");
                None
            }
        },
        None => None,
    };

    let orchestrator = Orchestrator::new(config.hub.clone(), registry, history);
    orchestrator.start();

    Ok(Arc::new(AppState {
        config,
        orchestrator,
    }))
}

/// Map an agent entry to a provider capability and the model it will use.
fn build_capability(
    entry: &AgentEntry,
    providers: &ProvidersConfig,
) -> Result<(Arc<dyn AgentCapability>, String), String> {
    match entry.provider.as_str() {
        "anthropic" => {
            let cfg = providers
                .anthropic
                .as_ref()
                .ok_or("no [providers.anthropic] section")?;
            let model = entry.model.clone().unwrap_or_else(|| cfg.model.clone());
            let capability = AnthropicCapability::new(
                cfg.api_key.clone(),
                Some(cfg.base_url.clone()),
                model.clone(),
            );
            Ok((Arc::new(capability), model))
        }
        "ollama" => {
            let (base_url, default_model) = providers
                .ollama
                .as_ref()
                .map(|c| (Some(c.base_url.clone()), c.model.clone()))
                .unwrap_or((None, "llama3.1".to_string()));
            let model = entry.model.clone().unwrap_or(default_model);
            let capability = OllamaCapability::new(base_url, model.clone());
            Ok((Arc::new(capability), model))
        }
        other => {
            let compat = providers.openai_compat.iter().find(|c| c.id == other);
            let (api_key, base_url, chat_path, provider_model) = match compat {
                Some(c) => (
                    c.api_key.clone(),
                    c.base_url.clone(),
                    c.chat_path.clone(),
                    c.model.clone(),
                ),
                // Known keyless endpoints (local servers) work without a
                // [providers.openai_compat] entry.
                None => (String::new(), None, None, None),
            };
            let model = entry.model.clone().or(provider_model);
            let capability =
                OpenAiCompatCapability::resolve(other, api_key, base_url, chat_path, model)
                    .map_err(|e| e.to_string())?;
            let model_key = capability.model().to_string();
            Ok((Arc::new(capability), model_key))
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
