//! Domain error type carrying the platform's stable error codes.
//!
//! Every variant maps to exactly one code from the public taxonomy. The HTTP
//! layer owns the status-code mapping; this crate only names the failure.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Prompt rejected: {0}")]
    InvalidPrompt(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Rate limited: retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable error code exposed on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::InvalidParams(_) => "INVALID_PARAMS",
            CoreError::InvalidPrompt(_) => "INVALID_PROMPT",
            CoreError::Unauthenticated(_) => "UNAUTHENTICATED",
            CoreError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            CoreError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            CoreError::StateConflict(_) => "STATE_CONFLICT",
            CoreError::RateLimited { .. } => "RATE_LIMITED",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CoreError::InvalidParams("x".into()).code(), "INVALID_PARAMS");
        assert_eq!(CoreError::QuotaExceeded("x".into()).code(), "QUOTA_EXCEEDED");
        assert_eq!(
            CoreError::RateLimited { retry_after_secs: 5 }.code(),
            "RATE_LIMITED"
        );
        assert_eq!(CoreError::StateConflict("x".into()).code(), "STATE_CONFLICT");
    }

    #[test]
    fn rate_limited_display_includes_retry_hint() {
        let err = CoreError::RateLimited { retry_after_secs: 12 };
        assert!(err.to_string().contains("12"));
    }
}
