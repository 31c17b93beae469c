//! Subscription lifecycle and access-control core.
//!
//! Reconciles asynchronous, possibly out-of-order billing-provider events
//! into a per-principal subscription ledger, and answers entitlement checks
//! against it. Provider calls are intent only; local state changes solely
//! through reconciled events.

#![deny(unsafe_code)]

pub mod billing;
pub mod entitlement;
pub mod error;
pub mod ledger;
pub mod reconciler;
pub mod runtime;
pub mod signature;
pub mod storage;
pub mod store;
pub mod types;

pub use billing::BillingConnector;
pub use entitlement::{has_entitlement, EntitlementGate};
pub use error::CoreError;
pub use ledger::{event_order, SubscriptionLedger};
pub use reconciler::{EventReconciler, ReconcileOutcome};
pub use runtime::{EngineConfig, SubscriptionEngine};
pub use signature::WebhookAuthority;
pub use storage::{bootstrap_store, StorageConfig};
pub use store::{MemorySubscriptionStore, SubscriptionStore, UpsertOutcome};
pub use types::{
    CancellationAck, CheckoutRequest, CheckoutSession, EntitlementReport, EventEnvelope,
    LifecycleEvent, SubscriptionChange, SubscriptionEnd, SubscriptionRecord, SubscriptionStatus,
    WireEvent,
};
