use thiserror::Error;

/// Studygate core errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("webhook signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("malformed provider event: {0}")]
    MalformedEvent(String),

    #[error("billing provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("no subscription on record for principal '{0}'")]
    SubscriptionNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn provider_unavailable(provider: &str, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// True for failures the caller may retry without risking duplicate
    /// provider-side effects on our ledger.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable { .. })
    }
}
