//! Billing connector adapters for studygate.

#![deny(unsafe_code)]

use async_trait::async_trait;
use studygate_core::error::CoreError;
use studygate_core::types::{CancellationAck, CheckoutRequest, CheckoutSession};
use studygate_core::BillingConnector;

/// Mock provider connector for deterministic local checkout simulation.
///
/// Session identifiers are derived from the request so repeated calls for the
/// same principal return the same session.
#[derive(Debug, Clone, Default)]
pub struct MockBillingConnector;

impl MockBillingConnector {
    fn session_id(request: &CheckoutRequest) -> String {
        let digest = blake3::hash(request.principal_id.as_bytes());
        let short: String = digest.to_hex().chars().take(12).collect();
        format!("cs-{short}")
    }
}

#[async_trait]
impl BillingConnector for MockBillingConnector {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CoreError> {
        let session_id = Self::session_id(request);
        Ok(CheckoutSession {
            url: format!("https://checkout.example.test/pay/{session_id}"),
            provider_session_id: session_id,
        })
    }

    async fn cancel_at_period_end(
        &self,
        provider_subscription_id: &str,
    ) -> Result<CancellationAck, CoreError> {
        Ok(CancellationAck {
            provider_subscription_id: provider_subscription_id.to_string(),
            cancel_at_period_end: true,
        })
    }
}

/// Deterministic failing connector useful for chaos testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailBillingConnector {
    reason: String,
}

impl AlwaysFailBillingConnector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl BillingConnector for AlwaysFailBillingConnector {
    fn provider(&self) -> &'static str {
        "always-fail"
    }

    async fn create_checkout_session(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CoreError> {
        Err(CoreError::provider_unavailable(
            self.provider(),
            self.reason.clone(),
        ))
    }

    async fn cancel_at_period_end(
        &self,
        _provider_subscription_id: &str,
    ) -> Result<CancellationAck, CoreError> {
        Err(CoreError::provider_unavailable(
            self.provider(),
            self.reason.clone(),
        ))
    }
}

/// Connector whose calls never complete; exercises caller-side timeouts.
#[derive(Debug, Clone, Default)]
pub struct StallingBillingConnector;

#[async_trait]
impl BillingConnector for StallingBillingConnector {
    fn provider(&self) -> &'static str {
        "stalling"
    }

    async fn create_checkout_session(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CoreError> {
        std::future::pending().await
    }

    async fn cancel_at_period_end(
        &self,
        _provider_subscription_id: &str,
    ) -> Result<CancellationAck, CoreError> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(principal_id: &str) -> CheckoutRequest {
        CheckoutRequest {
            principal_id: principal_id.to_string(),
            plan_name: "Study Guide Monthly Subscription".to_string(),
            unit_amount_minor: 4_999,
            currency: "usd".to_string(),
            interval: "month".to_string(),
            success_url: "https://studygate.example/success".to_string(),
            cancel_url: "https://studygate.example/cancel".to_string(),
        }
    }

    #[tokio::test]
    async fn mock_connector_is_deterministic_per_principal() {
        let connector = MockBillingConnector;

        let first = connector
            .create_checkout_session(&request("principal-1"))
            .await
            .unwrap();
        let second = connector
            .create_checkout_session(&request("principal-1"))
            .await
            .unwrap();
        assert_eq!(first.provider_session_id, second.provider_session_id);

        let other = connector
            .create_checkout_session(&request("principal-2"))
            .await
            .unwrap();
        assert_ne!(first.provider_session_id, other.provider_session_id);
    }

    #[tokio::test]
    async fn mock_connector_acknowledges_deferred_cancellation() {
        let connector = MockBillingConnector;
        let ack = connector.cancel_at_period_end("sub-1").await.unwrap();
        assert_eq!(ack.provider_subscription_id, "sub-1");
        assert!(ack.cancel_at_period_end);
    }

    #[tokio::test]
    async fn failing_connector_returns_retryable_error() {
        let connector = AlwaysFailBillingConnector::new("forced");
        let err = connector
            .create_checkout_session(&request("principal-1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn stalling_connector_never_resolves_within_a_deadline() {
        let connector = StallingBillingConnector;
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            connector.create_checkout_session(&request("principal-1")),
        )
        .await;
        assert!(result.is_err());
    }
}
