use thiserror::Error;

use crate::state::ChangeId;

/// Failures that abort handling of an event.
///
/// Policy rejections are not errors; they are answered with a comment and
/// the event completes normally.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("failed to load owners for {change}: {message}")]
    Owners { change: ChangeId, message: String },

    #[error("failed to resolve bot identity: {0}")]
    Identity(String),

    #[error("failed to {action} on {change}: {message}")]
    Mutation {
        change: ChangeId,
        action: String,
        message: String,
    },
}

/// Error reported by a capability implementation.
///
/// Kept as a plain message so adapters can wrap whatever transport error they
/// have (HTTP, JSON, ...) without the core depending on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CapabilityError(pub String);

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;
