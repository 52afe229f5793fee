pub mod delay;
pub mod orchestrator;
pub mod queue;

pub use orchestrator::Orchestrator;
pub use queue::{QueuedResponse, ResponseQueue, ResponseTrigger};
