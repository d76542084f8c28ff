//! Cross-document orchestration and outbound adapters.
//!
//! Handlers subscribe to the warehouse bus and run after the triggering
//! transaction has committed. A failing handler never affects the trigger;
//! its delivery lands in the bus failure ledger for re-drive.

pub mod audit;
pub mod discrepancy;
pub mod notify;

use std::sync::Arc;

use wareflow_events::{SubscriptionId, Topic};

use crate::engine::DocumentEngine;

pub use audit::{AuditEntry, AuditSink, AuditTrail, InMemoryAuditSink, TracingAuditSink};
pub use discrepancy::DiscrepancyOnFailedInspection;
pub use notify::{BroadcastNotifier, Notification, NotificationDispatcher, NotificationRelay};

/// Subscribe the standard handlers to the engine's bus.
///
/// Order matters for delivery: orchestration first, then audit, then
/// notifications.
pub fn wire(
    engine: &Arc<DocumentEngine>,
    system_actor: wareflow_auth::Actor,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationDispatcher>,
) -> Vec<SubscriptionId> {
    let bus = engine.bus();
    vec![
        bus.subscribe(
            Topic::event(discrepancy::TRIGGER),
            Arc::new(DiscrepancyOnFailedInspection::new(engine, system_actor)),
        ),
        bus.subscribe(Topic::All, Arc::new(AuditTrail::new(audit))),
        bus.subscribe(Topic::All, Arc::new(NotificationRelay::new(notifier))),
    ]
}
