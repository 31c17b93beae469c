use crate::error::CoreError;
use crate::ledger::SubscriptionLedger;
use crate::types::{EntitlementReport, SubscriptionRecord, SubscriptionStatus};
use chrono::{DateTime, Utc};

/// Pure entitlement predicate over ledger state.
///
/// Entitled iff a record exists, its status is active, and the current
/// instant has not passed the paid period's end. The hard period-end check
/// stands in for status updates that lag the provider's clock; an `Absent`
/// status is indistinguishable from a missing record here.
pub fn has_entitlement(record: Option<&SubscriptionRecord>, now: DateTime<Utc>) -> bool {
    let Some(record) = record else {
        return false;
    };
    if record.status != SubscriptionStatus::Active {
        return false;
    }
    match record.period_end {
        Some(end) => now <= end,
        None => true,
    }
}

/// Ledger-backed entitlement checks, one store read per call.
///
/// Cheap enough to sit on every protected request; no side effects.
#[derive(Clone)]
pub struct EntitlementGate {
    ledger: SubscriptionLedger,
}

impl EntitlementGate {
    pub fn new(ledger: SubscriptionLedger) -> Self {
        Self { ledger }
    }

    pub async fn check(&self, principal_id: &str) -> Result<EntitlementReport, CoreError> {
        let record = self.ledger.get(principal_id).await?;
        let now = Utc::now();

        Ok(EntitlementReport {
            entitled: has_entitlement(record.as_ref(), now),
            status: record
                .as_ref()
                .map(|r| r.status)
                .unwrap_or(SubscriptionStatus::Absent),
            period_end: record.as_ref().and_then(|r| r.period_end),
            checked_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(status: SubscriptionStatus, period_end: Option<DateTime<Utc>>) -> SubscriptionRecord {
        SubscriptionRecord {
            principal_id: "principal-1".to_string(),
            provider_subscription_id: "sub-1".to_string(),
            provider_customer_id: "cus-1".to_string(),
            status,
            period_start: None,
            period_end,
            last_updated_at: Utc.timestamp_opt(0, 0).single().unwrap(),
            last_event_id: "evt-1".to_string(),
        }
    }

    #[test]
    fn no_record_is_never_entitled() {
        assert!(!has_entitlement(None, Utc::now()));
    }

    #[test]
    fn absent_status_behaves_like_no_record() {
        let record = record(SubscriptionStatus::Absent, None);
        assert!(!has_entitlement(Some(&record), Utc::now()));
    }

    #[test]
    fn non_active_statuses_are_not_entitled() {
        let now = Utc::now();
        for status in [
            SubscriptionStatus::Pending,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
        ] {
            let record = record(status, Some(now + Duration::days(30)));
            assert!(!has_entitlement(Some(&record), now), "{status:?}");
        }
    }

    #[test]
    fn active_within_period_is_entitled() {
        let start = Utc.timestamp_opt(1_750_000_000, 0).single().unwrap();
        let record = record(SubscriptionStatus::Active, Some(start + Duration::days(30)));

        assert!(has_entitlement(Some(&record), start + Duration::days(1)));
    }

    #[test]
    fn active_past_period_end_is_not_entitled() {
        let end = Utc.timestamp_opt(1_750_000_000, 0).single().unwrap();
        let record = record(SubscriptionStatus::Active, Some(end));

        assert!(has_entitlement(Some(&record), end));
        assert!(!has_entitlement(
            Some(&record),
            end + Duration::seconds(1)
        ));
    }

    #[test]
    fn active_without_period_end_is_entitled() {
        let record = record(SubscriptionStatus::Active, None);
        assert!(has_entitlement(Some(&record), Utc::now()));
    }
}
