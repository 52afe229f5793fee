use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{stream, StreamExt};
use tracing::{info, warn};

use parley_core::{mentions, Message};

use crate::capability::{AgentCapability, InitOptions};
use crate::error::CapabilityError;

const DEFAULT_EMOJI: &str = "🤖";

/// Startup description of one agent seat, with its capability already built.
pub struct AgentDefinition {
    pub id: String,
    pub provider_key: String,
    pub model_key: String,
    /// Defaults to "<provider name> <model>".
    pub display_name: Option<String>,
    /// Defaults to the id.
    pub alias: Option<String>,
    pub emoji: Option<String>,
    pub persona: Option<String>,
    pub active: bool,
    pub capability: Arc<dyn AgentCapability>,
}

/// A registered agent. Identity fields are immutable; the runtime flags are
/// atomics so the orchestrator and generation-completion paths can flip them
/// without locking.
pub struct AgentRecord {
    pub id: String,
    pub provider_key: String,
    pub model_key: String,
    pub display_name: String,
    /// Handle without the leading `@`.
    pub display_alias: String,
    /// Handle with the leading `@`.
    pub alias: String,
    pub normalized_alias: String,
    pub emoji: String,
    pub persona: Option<String>,

    active: AtomicBool,
    generating: AtomicBool,
    just_responded: AtomicBool,
    last_message_ms: AtomicI64,

    capability: Arc<dyn AgentCapability>,
}

impl AgentRecord {
    pub fn capability(&self) -> &Arc<dyn AgentCapability> {
        &self.capability
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, v: bool) {
        self.active.store(v, Ordering::Relaxed);
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Relaxed)
    }

    pub fn set_generating(&self, v: bool) {
        self.generating.store(v, Ordering::Relaxed);
    }

    pub fn just_responded(&self) -> bool {
        self.just_responded.load(Ordering::Relaxed)
    }

    pub fn set_just_responded(&self, v: bool) {
        self.just_responded.store(v, Ordering::Relaxed);
    }

    pub fn last_message_ms(&self) -> i64 {
        self.last_message_ms.load(Ordering::Relaxed)
    }

    pub fn touch_last_message(&self, ms: i64) {
        self.last_message_ms.store(ms, Ordering::Relaxed);
    }
}

/// Registry of agent seats, keyed by agent id, answering alias lookups.
pub struct AgentRegistry {
    records: DashMap<String, Arc<AgentRecord>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Initialize all capabilities with bounded parallelism and register the
    /// survivors. Failures are logged and excluded; they never fail the
    /// batch. Registrations become observable only after this returns.
    ///
    /// Returns the number of registered agents.
    pub async fn initialize(
        &self,
        definitions: Vec<AgentDefinition>,
        max_parallel: usize,
        skip_healthcheck: bool,
    ) -> usize {
        let opts = InitOptions {
            validate: !skip_healthcheck,
        };

        let results: Vec<(AgentDefinition, Result<(), CapabilityError>)> =
            stream::iter(definitions)
                .map(|def| async move {
                    let outcome = def.capability.initialize(&opts).await;
                    (def, outcome)
                })
                .buffer_unordered(max_parallel.max(1))
                .collect()
                .await;

        let mut registered = 0;
        for (def, outcome) in results {
            match outcome {
                Ok(()) => {
                    if self.register(def) {
                        registered += 1;
                    }
                }
                Err(e) => {
                    warn!(agent_id = %def.id, error = %e, "agent capability failed to initialize, excluding");
                }
            }
        }
        info!(count = registered, "agent registry initialized");
        registered
    }

    /// Build the record for a definition and insert it. Rejects duplicate
    /// ids and duplicate normalized aliases so alias lookups stay unique.
    fn register(&self, def: AgentDefinition) -> bool {
        let display_alias = def
            .alias
            .unwrap_or_else(|| def.id.clone())
            .trim_start_matches('@')
            .to_string();
        let normalized_alias = mentions::normalize(&display_alias);
        if normalized_alias.is_empty() {
            warn!(agent_id = %def.id, "alias normalizes to nothing, excluding");
            return false;
        }
        if self.records.contains_key(&def.id) {
            warn!(agent_id = %def.id, "duplicate agent id, excluding");
            return false;
        }
        if self.find_by_normalized_alias(&normalized_alias).is_some() {
            warn!(agent_id = %def.id, alias = %display_alias, "duplicate alias, excluding");
            return false;
        }

        let display_name = def
            .display_name
            .unwrap_or_else(|| format!("{} {}", def.capability.name(), def.model_key));

        let record = AgentRecord {
            id: def.id.clone(),
            provider_key: def.provider_key,
            model_key: def.model_key,
            display_name,
            alias: format!("@{}", display_alias),
            display_alias,
            normalized_alias,
            emoji: def.emoji.unwrap_or_else(|| DEFAULT_EMOJI.to_string()),
            persona: def.persona,
            active: AtomicBool::new(def.active),
            generating: AtomicBool::new(false),
            just_responded: AtomicBool::new(false),
            last_message_ms: AtomicI64::new(0),
            capability: def.capability,
        };
        self.records.insert(def.id, Arc::new(record));
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentRecord>> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Exact match on the normalized alias.
    pub fn find_by_normalized_alias(&self, normalized: &str) -> Option<Arc<AgentRecord>> {
        self.records
            .iter()
            .find(|r| r.value().normalized_alias == normalized)
            .map(|r| r.value().clone())
    }

    /// Resolve the agent a transcript message came from: explicit id first,
    /// then the precomputed normalized alias, then normalizing the alias or
    /// sender display name.
    pub fn find_from_message(&self, message: &Message) -> Option<Arc<AgentRecord>> {
        if let Some(id) = &message.agent_id {
            if let Some(r) = self.get(id) {
                return Some(r);
            }
        }
        if let Some(norm) = &message.normalized_alias {
            if let Some(r) = self.find_by_normalized_alias(norm) {
                return Some(r);
            }
        }
        if let Some(alias) = &message.alias {
            if let Some(r) = self.find_by_normalized_alias(&mentions::normalize(alias)) {
                return Some(r);
            }
        }
        self.find_by_normalized_alias(&mentions::normalize(&message.sender))
    }

    /// The `@handle` used to address an agent in chat text.
    pub fn mention_token(&self, record: &AgentRecord) -> String {
        format!("@{}", record.display_alias)
    }

    pub fn display_name(&self, record: &AgentRecord) -> String {
        record.display_name.clone()
    }

    /// All records, ordered by id for deterministic output.
    pub fn all(&self) -> Vec<Arc<AgentRecord>> {
        let mut out: Vec<_> = self.records.iter().map(|r| r.value().clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn active_agents(&self) -> Vec<Arc<AgentRecord>> {
        self.all().into_iter().filter(|a| a.is_active()).collect()
    }

    /// How many agents currently have a generation in flight.
    pub fn generating_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.value().is_generating())
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ChatMessage, Generation};
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl AgentCapability for AlwaysOk {
        fn name(&self) -> &str {
            "Mock"
        }
        fn model(&self) -> &str {
            "mock-1"
        }
        fn is_configured(&self) -> bool {
            true
        }
        async fn initialize(&self, _opts: &InitOptions) -> Result<(), CapabilityError> {
            Ok(())
        }
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<Generation, CapabilityError> {
            Ok(Generation {
                content: "ok".to_string(),
                response_time_ms: Some(1),
                model: Some("mock-1".to_string()),
            })
        }
    }

    struct FailsInit;

    #[async_trait]
    impl AgentCapability for FailsInit {
        fn name(&self) -> &str {
            "Broken"
        }
        fn model(&self) -> &str {
            "broken-1"
        }
        fn is_configured(&self) -> bool {
            false
        }
        async fn initialize(&self, _opts: &InitOptions) -> Result<(), CapabilityError> {
            Err(CapabilityError::Unavailable("intentional failure".into()))
        }
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<Generation, CapabilityError> {
            Err(CapabilityError::Unavailable("intentional failure".into()))
        }
    }

    fn def(id: &str, alias: Option<&str>) -> AgentDefinition {
        AgentDefinition {
            id: id.to_string(),
            provider_key: "mock".to_string(),
            model_key: "mock-1".to_string(),
            display_name: None,
            alias: alias.map(String::from),
            emoji: None,
            persona: None,
            active: true,
            capability: Arc::new(AlwaysOk),
        }
    }

    #[tokio::test]
    async fn init_registers_survivors_and_excludes_failures() {
        let registry = AgentRegistry::new();
        let mut broken = def("broken", None);
        broken.capability = Arc::new(FailsInit);

        let n = registry
            .initialize(vec![def("alice", None), broken, def("bob", None)], 8, false)
            .await;
        assert_eq!(n, 2);
        assert!(registry.get("alice").is_some());
        assert!(registry.get("broken").is_none());
    }

    #[tokio::test]
    async fn skip_healthcheck_registers_failing_capability() {
        let registry = AgentRegistry::new();
        let mut broken = def("broken", None);
        broken.capability = Arc::new(FailsInit);

        let n = registry.initialize(vec![broken], 8, true).await;
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn duplicate_normalized_alias_is_rejected() {
        let registry = AgentRegistry::new();
        let n = registry
            .initialize(
                vec![def("a1", Some("@Alice")), def("a2", Some("alice"))],
                8,
                false,
            )
            .await;
        assert_eq!(n, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn defaults_are_derived() {
        let registry = AgentRegistry::new();
        registry.initialize(vec![def("alice", None)], 8, false).await;
        let rec = registry.get("alice").unwrap();
        assert_eq!(rec.display_name, "Mock mock-1");
        assert_eq!(rec.alias, "@alice");
        assert_eq!(rec.display_alias, "alice");
        assert_eq!(rec.emoji, "🤖");
        assert_eq!(registry.mention_token(&rec), "@alice");
    }

    #[tokio::test]
    async fn find_from_message_falls_back_through_fields() {
        let registry = AgentRegistry::new();
        registry
            .initialize(vec![def("alice", Some("Alice"))], 8, false)
            .await;

        let mut by_id = Message::agent("whoever", "x", "default");
        by_id.agent_id = Some("alice".to_string());
        assert!(registry.find_from_message(&by_id).is_some());

        let mut by_alias = Message::agent("whoever", "x", "default");
        by_alias.alias = Some("@ALICE".to_string());
        assert!(registry.find_from_message(&by_alias).is_some());

        let by_sender = Message::agent("Alice", "x", "default");
        assert!(registry.find_from_message(&by_sender).is_some());

        let unknown = Message::agent("nobody", "x", "default");
        assert!(registry.find_from_message(&unknown).is_none());
    }

    #[tokio::test]
    async fn generating_count_tracks_flags() {
        let registry = AgentRegistry::new();
        registry
            .initialize(vec![def("a", None), def("b", None)], 8, false)
            .await;
        assert_eq!(registry.generating_count(), 0);
        registry.get("a").unwrap().set_generating(true);
        assert_eq!(registry.generating_count(), 1);
    }
}
