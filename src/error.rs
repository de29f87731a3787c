use std::fmt;

use crate::providers::ProviderError;

/// Engine error taxonomy. Each kind maps to one boundary disposition: which
/// status to surface, and whether any meeting state changed underneath.
#[derive(Debug)]
pub enum CoreError {
    /// Empty/over-long input, unknown enum value, bad reference, or a
    /// permission violation. No state was changed.
    Validation { field: String, message: String },
    /// Unknown agent/meeting/agenda-item id.
    NotFound { resource: &'static str, id: String },
    /// Operation disallowed in the meeting's current state.
    StateConflict { message: String },
    /// A model provider call failed after retries were exhausted (or was
    /// non-retryable to begin with).
    Provider(ProviderError),
    /// Entity-store save/load failure. Any in-memory mutation was discarded.
    PersistenceFailed { message: String },
    /// The caller stopped the operation. Not an error to the user-facing
    /// layer; in-flight data was discarded.
    Cancelled,
}

impl CoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceFailed {
            message: message.into(),
        }
    }

    /// Short classification label used in `turn_failed` events and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::StateConflict { .. } => "state_conflict",
            Self::Provider(e) => e.kind.label(),
            Self::PersistenceFailed { .. } => "persistence_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, message } => write!(f, "{} ({})", message, field),
            Self::NotFound { resource, id } => write!(f, "{} {} not found", resource, id),
            Self::StateConflict { message } => write!(f, "{}", message),
            Self::Provider(e) => write!(f, "{}", e),
            Self::PersistenceFailed { message } => write!(f, "persistence failed: {}", message),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
