use thiserror::Error;

/// Broker-level failure, shared by every transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached (connect-time).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// A broker command failed on an established connection.
    #[error("broker command failed: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The delivery handle is not (or no longer) outstanding on this connection.
    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),

    /// Publishing to a queue or exchange that was never declared.
    #[error("not declared: {0}")]
    NotDeclared(String),
}

impl BrokerError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}
