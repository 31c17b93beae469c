use crate::error::CoreError;
use crate::ledger::SubscriptionLedger;
use crate::store::UpsertOutcome;
use crate::types::{
    EventEnvelope, LifecycleEvent, SubscriptionChange, SubscriptionEnd, SubscriptionRecord,
    SubscriptionStatus,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

/// Outcome of reconciling one provider event.
///
/// Every variant is acknowledged to the provider as success; none is an
/// error. The distinction exists for logging and for callers that surface
/// processing results separately from acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        principal_id: String,
        status: SubscriptionStatus,
    },
    Duplicate,
    RejectedStale,
    Ignored {
        raw_type: String,
    },
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Duplicate => "duplicate",
            Self::RejectedStale => "stale",
            Self::Ignored { .. } => "ignored",
        }
    }
}

/// Bounded log of applied event ids, evicted in insertion order.
///
/// Short-circuits provider redelivery without growing unboundedly; the
/// store-level comparator backstops replay detection for anything evicted
/// (or after a restart), since an exact ordering-pair match reads back as
/// `Duplicate`.
#[derive(Debug)]
struct AppliedEventLog {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl AppliedEventLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn contains(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    fn record(&mut self, event_id: &str) {
        if !self.seen.insert(event_id.to_string()) {
            return;
        }
        self.order.push_back(event_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}

/// Applies provider lifecycle events to the ledger under idempotency and
/// ordering rules.
///
/// The reconciler trusts the authenticity of its input (signatures are
/// checked upstream, on raw bytes) but never its ordering: stale events are
/// rejected by the comparator, redelivered events collapse to no-ops, and
/// deletions become canceled tombstones built solely from the deletion event
/// so any arrival order converges on the same final record.
pub struct EventReconciler {
    ledger: SubscriptionLedger,
    applied: Mutex<AppliedEventLog>,
}

const APPLIED_EVENT_LOG_CAPACITY: usize = 4096;

impl EventReconciler {
    pub fn new(ledger: SubscriptionLedger) -> Self {
        Self {
            ledger,
            applied: Mutex::new(AppliedEventLog::new(APPLIED_EVENT_LOG_CAPACITY)),
        }
    }

    pub async fn apply(&self, envelope: EventEnvelope) -> Result<ReconcileOutcome, CoreError> {
        if self.already_applied(&envelope.event_id) {
            tracing::debug!(event_id = %envelope.event_id, "redelivered event, skipping");
            return Ok(ReconcileOutcome::Duplicate);
        }

        let EventEnvelope {
            event_id,
            principal_id,
            occurred_at,
            event,
        } = envelope;

        let record = match event {
            LifecycleEvent::Created(change) | LifecycleEvent::Updated(change) => {
                change_record(&principal_id, &event_id, occurred_at, change)
            }
            LifecycleEvent::Deleted(end) => {
                tombstone_record(&principal_id, &event_id, occurred_at, end)
            }
            LifecycleEvent::Unrecognized { raw_type } => {
                tracing::warn!(%event_id, %raw_type, "unrecognized event type acknowledged");
                return Ok(ReconcileOutcome::Ignored { raw_type });
            }
        };

        let status = record.status;
        match self.ledger.upsert(record).await? {
            UpsertOutcome::Applied => {
                self.mark_applied(&event_id);
                Ok(ReconcileOutcome::Applied {
                    principal_id,
                    status,
                })
            }
            UpsertOutcome::Duplicate => {
                self.mark_applied(&event_id);
                Ok(ReconcileOutcome::Duplicate)
            }
            UpsertOutcome::RejectedStale => {
                tracing::info!(%event_id, %principal_id, "stale event rejected");
                Ok(ReconcileOutcome::RejectedStale)
            }
        }
    }

    fn already_applied(&self, event_id: &str) -> bool {
        self.applied
            .lock()
            .map(|log| log.contains(event_id))
            .unwrap_or(false)
    }

    fn mark_applied(&self, event_id: &str) {
        if let Ok(mut log) = self.applied.lock() {
            log.record(event_id);
        }
    }
}

fn change_record(
    principal_id: &str,
    event_id: &str,
    occurred_at: chrono::DateTime<chrono::Utc>,
    change: SubscriptionChange,
) -> SubscriptionRecord {
    SubscriptionRecord {
        principal_id: principal_id.to_string(),
        provider_subscription_id: change.provider_subscription_id,
        provider_customer_id: change.provider_customer_id,
        status: change.status,
        period_start: change.period_start,
        period_end: change.period_end,
        last_updated_at: occurred_at,
        last_event_id: event_id.to_string(),
    }
}

/// Deletion leaves a canceled tombstone rather than erasing the row: the
/// tombstone carries the deletion event's own ordering pair, so a staler
/// update arriving afterwards cannot resurrect the subscription, and a stale
/// deletion loses the comparator against newer active state. Built only from
/// the deletion event itself so the final record is arrival-order
/// independent.
fn tombstone_record(
    principal_id: &str,
    event_id: &str,
    occurred_at: chrono::DateTime<chrono::Utc>,
    end: SubscriptionEnd,
) -> SubscriptionRecord {
    SubscriptionRecord {
        principal_id: principal_id.to_string(),
        provider_subscription_id: end.provider_subscription_id.unwrap_or_default(),
        provider_customer_id: end.provider_customer_id.unwrap_or_default(),
        status: SubscriptionStatus::Canceled,
        period_start: None,
        period_end: None,
        last_updated_at: occurred_at,
        last_event_id: event_id.to_string(),
    }
}
