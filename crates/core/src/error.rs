//! Errors raised while building domain values from untrusted input.

use thiserror::Error;

/// Input that cannot become a domain value.
///
/// Broker and storage failures belong to the infrastructure crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value parsed but breaks a rule (non-positive key, blank requester).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Text that does not parse as an identifier at all.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
