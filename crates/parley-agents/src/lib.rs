pub mod anthropic;
pub mod capability;
pub mod error;
pub mod known;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod registry;
pub mod strategy;

pub use capability::{AgentCapability, ChatMessage, ChatRole, Generation, InitOptions};
pub use error::CapabilityError;
pub use registry::{AgentDefinition, AgentRecord, AgentRegistry};
pub use strategy::{MentionTarget, Strategy, StrategyPlan};
