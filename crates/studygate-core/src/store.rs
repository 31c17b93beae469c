use crate::error::CoreError;
use crate::ledger::event_order;
use crate::types::SubscriptionRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;

/// Outcome of a conditional upsert against the ordering rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The incoming record created or replaced the stored one.
    Applied,
    /// The stored record already reflects exactly this event.
    Duplicate,
    /// The incoming record lost the comparator; the store is unchanged.
    RejectedStale,
}

/// Storage capability backing the subscription ledger.
///
/// Implementations must make `upsert` atomic per principal: concurrent
/// upserts for different principals proceed independently, concurrent
/// upserts for the same principal serialize so exactly one wins under
/// the ordering rule.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, principal_id: &str) -> Result<Option<SubscriptionRecord>, CoreError>;

    /// Replace the record for `record.principal_id` iff the incoming
    /// `(last_updated_at, last_event_id)` pair is not older than the stored
    /// pair; otherwise leave the store untouched and report why.
    async fn upsert(&self, record: SubscriptionRecord) -> Result<UpsertOutcome, CoreError>;

    /// Unconditional removal; reserved for operator maintenance, never for
    /// provider event handling.
    async fn remove(&self, principal_id: &str) -> Result<bool, CoreError>;
}

/// Sharded in-memory store.
///
/// The map's entry API holds a per-key shard lock across the compare-and-set,
/// which is the whole per-principal serialization story for this backend.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    records: DashMap<String, SubscriptionRecord>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn get(&self, principal_id: &str) -> Result<Option<SubscriptionRecord>, CoreError> {
        Ok(self.records.get(principal_id).map(|entry| entry.clone()))
    }

    async fn upsert(&self, record: SubscriptionRecord) -> Result<UpsertOutcome, CoreError> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(record.principal_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(UpsertOutcome::Applied)
            }
            Entry::Occupied(mut slot) => {
                let stored = slot.get();
                let incoming = (record.last_updated_at, record.last_event_id.as_str());
                let current = (stored.last_updated_at, stored.last_event_id.as_str());
                match event_order(incoming, current) {
                    Ordering::Greater => {
                        slot.insert(record);
                        Ok(UpsertOutcome::Applied)
                    }
                    Ordering::Equal => Ok(UpsertOutcome::Duplicate),
                    Ordering::Less => Ok(UpsertOutcome::RejectedStale),
                }
            }
        }
    }

    async fn remove(&self, principal_id: &str) -> Result<bool, CoreError> {
        Ok(self.records.remove(principal_id).is_some())
    }
}
