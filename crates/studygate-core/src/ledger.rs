use crate::error::CoreError;
use crate::store::{SubscriptionStore, UpsertOutcome};
use crate::types::SubscriptionRecord;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;

/// Total order over a principal's provider events: later `occurred_at` wins,
/// and exact timestamp ties go to the lexicographically greater `event_id`.
///
/// Every mutation path routes through this comparator; map insertion order and
/// delivery order never decide the winner.
pub fn event_order(a: (DateTime<Utc>, &str), b: (DateTime<Utc>, &str)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

/// Authoritative local record of each principal's subscription state.
///
/// The ledger never initiates state changes; it applies provider events under
/// the ordering rule and answers point reads. At most one record exists per
/// principal, so an upsert replaces, never duplicates.
#[derive(Clone)]
pub struct SubscriptionLedger {
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionLedger {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, principal_id: &str) -> Result<Option<SubscriptionRecord>, CoreError> {
        self.store.get(principal_id).await
    }

    /// Conditionally replace the principal's record; losers of the ordering
    /// rule are reported as `RejectedStale` for observability, never applied.
    pub async fn upsert(&self, record: SubscriptionRecord) -> Result<UpsertOutcome, CoreError> {
        let principal_id = record.principal_id.clone();
        let outcome = self.store.upsert(record).await?;
        if outcome == UpsertOutcome::RejectedStale {
            tracing::debug!(%principal_id, "rejected stale subscription upsert");
        }
        Ok(outcome)
    }

    /// Unconditional removal, for operator maintenance only. Provider deletion
    /// events go through `upsert` as canceled tombstones so the ordering rule
    /// keeps protecting the principal after the fact.
    pub async fn remove(&self, principal_id: &str) -> Result<bool, CoreError> {
        self.store.remove(principal_id).await
    }
}
