mod broker;
mod error;

pub use broker::MessageBroker;
pub use error::BrokerError;
