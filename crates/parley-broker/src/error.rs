use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker queue full ({capacity} pending), message dropped")]
    QueueFull { capacity: usize },
}
