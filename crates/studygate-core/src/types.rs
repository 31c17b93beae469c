use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription lifecycle states mirrored from the billing provider.
///
/// `Absent` is the explicit "no subscription" state and must behave exactly
/// like a missing record everywhere entitlement is decided.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    PastDue,
    Canceled,
    Absent,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Absent => "absent",
        }
    }

    /// Map a provider status label onto the local model.
    ///
    /// Labels this system does not model resolve to `None`; callers decide the
    /// fallback (the reconciler downgrades to `Pending`, which never grants
    /// access).
    pub fn from_provider_label(label: &str) -> Option<Self> {
        match label {
            "pending" | "incomplete" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }
}

/// One subscription record per principal, replaced (never duplicated) as
/// provider events are applied.
///
/// `last_updated_at` and `last_event_id` carry the ordering state used to
/// reject stale events; they advance only when an event wins the comparator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRecord {
    pub principal_id: String,
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub last_event_id: String,
}

/// Subscription fields carried by `created`/`updated` lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub provider_subscription_id: String,
    pub provider_customer_id: String,
    pub status: SubscriptionStatus,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// Terminal fields carried by `deleted` lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEnd {
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
}

/// Provider lifecycle notification, one variant per event class.
///
/// Exhaustive matching over this enum is the single dispatch point for
/// reconciliation; new event classes fail to compile until handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Created(SubscriptionChange),
    Updated(SubscriptionChange),
    Deleted(SubscriptionEnd),
    Unrecognized { raw_type: String },
}

/// Parsed provider event envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub event_id: String,
    pub principal_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event: LifecycleEvent,
}

/// Raw wire form of a provider event, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event_id: String,
    pub principal_id: String,
    #[serde(default)]
    pub provider_subscription_id: Option<String>,
    #[serde(default)]
    pub provider_customer_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Decode raw webhook bytes into a classified envelope.
    pub fn parse(raw: &[u8]) -> Result<Self, CoreError> {
        let wire: WireEvent = serde_json::from_slice(raw)
            .map_err(|e| CoreError::MalformedEvent(format!("event decode failed: {e}")))?;
        Self::from_wire(wire)
    }

    pub fn from_wire(wire: WireEvent) -> Result<Self, CoreError> {
        if wire.event_id.trim().is_empty() {
            return Err(CoreError::MalformedEvent("event_id is required".to_string()));
        }
        if wire.principal_id.trim().is_empty() {
            return Err(CoreError::MalformedEvent(
                "principal_id is required".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (wire.period_start, wire.period_end) {
            if end < start {
                return Err(CoreError::MalformedEvent(format!(
                    "period_end {end} precedes period_start {start}"
                )));
            }
        }

        // Providers namespace event types ("customer.subscription.created");
        // classification keys off the final segment.
        let class = wire.event_type.rsplit('.').next().unwrap_or_default();
        let event = match class {
            "created" => LifecycleEvent::Created(subscription_change(&wire)?),
            "updated" => LifecycleEvent::Updated(subscription_change(&wire)?),
            "deleted" => LifecycleEvent::Deleted(SubscriptionEnd {
                provider_subscription_id: wire.provider_subscription_id.clone(),
                provider_customer_id: wire.provider_customer_id.clone(),
            }),
            _ => LifecycleEvent::Unrecognized {
                raw_type: wire.event_type.clone(),
            },
        };

        Ok(Self {
            event_id: wire.event_id,
            principal_id: wire.principal_id,
            occurred_at: wire.occurred_at,
            event,
        })
    }
}

fn subscription_change(wire: &WireEvent) -> Result<SubscriptionChange, CoreError> {
    let provider_subscription_id = wire
        .provider_subscription_id
        .clone()
        .ok_or_else(|| CoreError::MalformedEvent("provider_subscription_id is required".into()))?;

    let label = wire
        .status
        .as_deref()
        .ok_or_else(|| CoreError::MalformedEvent("status is required".into()))?;
    let status = SubscriptionStatus::from_provider_label(label).unwrap_or_else(|| {
        tracing::warn!(status = label, "unmodeled provider status, holding as pending");
        SubscriptionStatus::Pending
    });

    Ok(SubscriptionChange {
        provider_subscription_id,
        provider_customer_id: wire.provider_customer_id.clone().unwrap_or_default(),
        status,
        period_start: wire.period_start,
        period_end: wire.period_end,
    })
}

/// Entitlement snapshot returned to status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementReport {
    pub entitled: bool,
    pub status: SubscriptionStatus,
    pub period_end: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
}

/// Checkout parameters forwarded to the provider's hosted flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub principal_id: String,
    pub plan_name: String,
    pub unit_amount_minor: u64,
    pub currency: String,
    pub interval: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted checkout session handed back to the caller for redirect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub provider_session_id: String,
    pub url: String,
}

/// Acknowledgment of a deferred cancellation request.
///
/// This is intent only: the ledger reflects the cancellation when the
/// provider's own lifecycle event is reconciled later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationAck {
    pub provider_subscription_id: String,
    pub cancel_at_period_end: bool,
}
