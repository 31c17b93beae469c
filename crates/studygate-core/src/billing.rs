use crate::error::CoreError;
use crate::types::{CancellationAck, CheckoutRequest, CheckoutSession};
use async_trait::async_trait;

/// Pluggable billing-provider connector.
///
/// Implementations talk to the external subscription system of record. They
/// initiate intent only; local subscription state changes exclusively through
/// reconciled lifecycle events, never through these calls succeeding.
#[async_trait]
pub trait BillingConnector: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Begin a hosted checkout flow and return the redirect target.
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, CoreError>;

    /// Request deferred cancellation; access runs to the end of the paid
    /// period and the ledger is updated only by the provider's later event.
    async fn cancel_at_period_end(
        &self,
        provider_subscription_id: &str,
    ) -> Result<CancellationAck, CoreError>;
}
