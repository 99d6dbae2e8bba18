//! Error types for FlowPilot.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FlowError>;

/// All errors the automation core can produce.
///
/// Validation errors surface synchronously to the editing caller; dispatch
/// failures are swallowed at the engine boundary into an automation-log
/// entry and never abort a sweep tick.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Malformed definition or rejected edit (fixed stages, bad delays, cycles).
    #[error("validation: {0}")]
    Validation(String),

    /// Referenced definition, stage, action, or subject does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Scheduled-action store / automation-log persistence failure.
    #[error("store: {0}")]
    Store(String),

    /// Action dispatch failure (message provider, task creation).
    #[error("dispatch: {0}")]
    Dispatch(String),

    /// Configuration load/parse failure.
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let e = FlowError::validation("first stage must be new_lead");
        assert!(e.to_string().starts_with("validation:"));
        let e = FlowError::dispatch("whatsapp unreachable");
        assert!(e.to_string().contains("whatsapp"));
    }
}
