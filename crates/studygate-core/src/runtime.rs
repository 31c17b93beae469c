use crate::billing::BillingConnector;
use crate::entitlement::EntitlementGate;
use crate::error::CoreError;
use crate::ledger::SubscriptionLedger;
use crate::reconciler::{EventReconciler, ReconcileOutcome};
use crate::signature::WebhookAuthority;
use crate::storage::{bootstrap_store, StorageConfig};
use crate::types::{
    CancellationAck, CheckoutRequest, CheckoutSession, EntitlementReport, EventEnvelope,
    SubscriptionRecord, SubscriptionStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub webhook_secret: String,
    /// Upper bound on any single outbound provider call. An elapsed timeout
    /// means the outcome is unknown, never assumed successful.
    pub provider_timeout: Duration,
    pub plan_name: String,
    pub plan_amount_minor: u64,
    pub plan_currency: String,
    pub plan_interval: String,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            webhook_secret: "studygate-local-dev-secret".to_string(),
            provider_timeout: Duration::from_secs(10),
            plan_name: "Study Guide Monthly Subscription".to_string(),
            plan_amount_minor: 4_999,
            plan_currency: "usd".to_string(),
            plan_interval: "month".to_string(),
            checkout_success_url: "https://studygate.example/success".to_string(),
            checkout_cancel_url: "https://studygate.example/cancel".to_string(),
        }
    }
}

/// Orchestrates the subscription core: webhook reconciliation into the
/// ledger, entitlement reads, and intent calls out to the billing provider.
pub struct SubscriptionEngine {
    ledger: SubscriptionLedger,
    reconciler: EventReconciler,
    gate: EntitlementGate,
    billing: Arc<dyn BillingConnector>,
    webhook_authority: WebhookAuthority,
    storage_label: &'static str,
    config: EngineConfig,
}

impl SubscriptionEngine {
    pub async fn bootstrap(
        config: EngineConfig,
        billing: Arc<dyn BillingConnector>,
    ) -> Result<Self, CoreError> {
        let storage_label = config.storage.label();
        let store = bootstrap_store(config.storage.clone()).await?;
        let ledger = SubscriptionLedger::new(store);

        Ok(Self {
            reconciler: EventReconciler::new(ledger.clone()),
            gate: EntitlementGate::new(ledger.clone()),
            ledger,
            billing,
            webhook_authority: WebhookAuthority::new(&config.webhook_secret),
            storage_label,
            config,
        })
    }

    pub fn storage_label(&self) -> &'static str {
        self.storage_label
    }

    pub fn webhook_authority(&self) -> &WebhookAuthority {
        &self.webhook_authority
    }

    /// Verify, decode, and reconcile one provider notification.
    ///
    /// Signature verification runs on the raw bytes before parsing; a bad
    /// signature is the only rejection the provider should retry. Every
    /// reconcile outcome, no-ops included, is an acceptance.
    pub async fn ingest_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ReconcileOutcome, CoreError> {
        self.webhook_authority.verify(payload, signature)?;
        let envelope = EventEnvelope::parse(payload)?;
        self.reconciler.apply(envelope).await
    }

    /// Begin a hosted checkout flow for the principal.
    pub async fn begin_checkout(&self, principal_id: &str) -> Result<CheckoutSession, CoreError> {
        let request = CheckoutRequest {
            principal_id: principal_id.to_string(),
            plan_name: self.config.plan_name.clone(),
            unit_amount_minor: self.config.plan_amount_minor,
            currency: self.config.plan_currency.clone(),
            interval: self.config.plan_interval.clone(),
            success_url: self.config.checkout_success_url.clone(),
            cancel_url: self.config.checkout_cancel_url.clone(),
        };

        self.provider_call(self.billing.create_checkout_session(&request))
            .await
    }

    /// Request deferred cancellation of the principal's subscription.
    ///
    /// The ledger is deliberately untouched here; entitlement changes only
    /// when the provider's own deletion event is reconciled.
    pub async fn request_cancellation(
        &self,
        principal_id: &str,
    ) -> Result<CancellationAck, CoreError> {
        let record = self
            .subscription(principal_id)
            .await?
            .ok_or_else(|| CoreError::SubscriptionNotFound(principal_id.to_string()))?;

        self.provider_call(
            self.billing
                .cancel_at_period_end(&record.provider_subscription_id),
        )
        .await
    }

    pub async fn entitlement(&self, principal_id: &str) -> Result<EntitlementReport, CoreError> {
        self.gate.check(principal_id).await
    }

    /// Current record, with the explicit `absent` status normalized away.
    pub async fn subscription(
        &self,
        principal_id: &str,
    ) -> Result<Option<SubscriptionRecord>, CoreError> {
        Ok(self
            .ledger
            .get(principal_id)
            .await?
            .filter(|record| record.status != SubscriptionStatus::Absent))
    }

    /// Operator maintenance: drop a record that no longer grants anything.
    /// Records in any state the provider could still advance are left alone.
    pub async fn purge(&self, principal_id: &str) -> Result<bool, CoreError> {
        match self.ledger.get(principal_id).await? {
            Some(record)
                if matches!(
                    record.status,
                    SubscriptionStatus::Canceled | SubscriptionStatus::Absent
                ) =>
            {
                self.ledger.remove(principal_id).await
            }
            _ => Ok(false),
        }
    }

    async fn provider_call<T>(
        &self,
        call: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        match tokio::time::timeout(self.config.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::provider_unavailable(
                self.billing.provider(),
                "call timed out; outcome unknown",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    struct StaticBillingConnector;

    #[async_trait]
    impl BillingConnector for StaticBillingConnector {
        fn provider(&self) -> &'static str {
            "static"
        }

        async fn create_checkout_session(
            &self,
            request: &CheckoutRequest,
        ) -> Result<CheckoutSession, CoreError> {
            Ok(CheckoutSession {
                provider_session_id: format!("cs-{}", request.principal_id),
                url: format!("https://checkout.test/{}", request.principal_id),
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

    struct NeverRespondsConnector;

    #[async_trait]
    impl BillingConnector for NeverRespondsConnector {
        fn provider(&self) -> &'static str {
            "never"
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

    async fn engine() -> SubscriptionEngine {
        SubscriptionEngine::bootstrap(EngineConfig::default(), Arc::new(StaticBillingConnector))
            .await
            .unwrap()
    }

    fn signed_event(engine: &SubscriptionEngine, body: serde_json::Value) -> (Vec<u8>, String) {
        let payload = body.to_string().into_bytes();
        let signature = engine.webhook_authority().sign(&payload);
        (payload, signature)
    }

    #[tokio::test]
    async fn reconciled_active_event_grants_entitlement() {
        let engine = engine().await;
        let period_end = Utc::now() + ChronoDuration::days(30);
        let (payload, signature) = signed_event(
            &engine,
            serde_json::json!({
                "type": "customer.subscription.created",
                "event_id": "evt-1",
                "principal_id": "principal-1",
                "provider_subscription_id": "sub-1",
                "provider_customer_id": "cus-1",
                "status": "active",
                "period_end": period_end,
                "occurred_at": Utc::now(),
            }),
        );

        let outcome = engine.ingest_webhook(&payload, &signature).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied { .. }));

        let report = engine.entitlement("principal-1").await.unwrap();
        assert!(report.entitled);
        assert_eq!(report.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_parsing() {
        let engine = engine().await;

        let err = engine
            .ingest_webhook(b"{not even json", "0000")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SignatureVerification(_)));
    }

    #[tokio::test]
    async fn checkout_passes_through_to_the_connector() {
        let engine = engine().await;
        let session = engine.begin_checkout("principal-1").await.unwrap();
        assert_eq!(session.provider_session_id, "cs-principal-1");
    }

    #[tokio::test]
    async fn cancellation_requires_a_record_and_leaves_the_ledger_alone() {
        let engine = engine().await;

        let err = engine.request_cancellation("principal-1").await.unwrap_err();
        assert!(matches!(err, CoreError::SubscriptionNotFound(_)));

        let (payload, signature) = signed_event(
            &engine,
            serde_json::json!({
                "type": "customer.subscription.created",
                "event_id": "evt-1",
                "principal_id": "principal-1",
                "provider_subscription_id": "sub-1",
                "status": "active",
                "occurred_at": Utc::now(),
            }),
        );
        engine.ingest_webhook(&payload, &signature).await.unwrap();

        let ack = engine.request_cancellation("principal-1").await.unwrap();
        assert!(ack.cancel_at_period_end);

        // Intent only: still entitled until the provider's event lands.
        let report = engine.entitlement("principal-1").await.unwrap();
        assert!(report.entitled);
    }

    #[tokio::test]
    async fn timed_out_provider_call_reports_unknown_outcome() {
        let config = EngineConfig {
            provider_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let engine = SubscriptionEngine::bootstrap(config, Arc::new(NeverRespondsConnector))
            .await
            .unwrap();

        let err = engine.begin_checkout("principal-1").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, CoreError::ProviderUnavailable { .. }));
    }

    #[tokio::test]
    async fn purge_only_removes_settled_records() {
        let engine = engine().await;
        let (payload, signature) = signed_event(
            &engine,
            serde_json::json!({
                "type": "customer.subscription.created",
                "event_id": "evt-1",
                "principal_id": "principal-1",
                "provider_subscription_id": "sub-1",
                "status": "active",
                "occurred_at": Utc::now(),
            }),
        );
        engine.ingest_webhook(&payload, &signature).await.unwrap();

        assert!(!engine.purge("principal-1").await.unwrap());

        let (payload, signature) = signed_event(
            &engine,
            serde_json::json!({
                "type": "customer.subscription.deleted",
                "event_id": "evt-2",
                "principal_id": "principal-1",
                "provider_subscription_id": "sub-1",
                "occurred_at": Utc::now() + ChronoDuration::seconds(5),
            }),
        );
        engine.ingest_webhook(&payload, &signature).await.unwrap();

        assert!(engine.purge("principal-1").await.unwrap());
        assert!(engine.subscription("principal-1").await.unwrap().is_none());
    }
}
