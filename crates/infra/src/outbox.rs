//! Post-commit publication of outbox events.

use uuid::Uuid;

use crate::error::EngineResult;
use crate::events::{WarehouseBus, WarehouseSystemEvent};
use crate::store::DocumentStore;

/// Deliver committed events, then mark them published.
///
/// Must only be called after the originating transaction has been released:
/// handlers may open transactions of their own. Handler failures are kept in
/// the bus failure ledger, so the events still count as published here.
pub(crate) async fn publish_committed(
    store: &dyn DocumentStore,
    bus: &WarehouseBus,
    events: Vec<WarehouseSystemEvent>,
) {
    if events.is_empty() {
        return;
    }
    let mut published: Vec<Uuid> = Vec::with_capacity(events.len());
    for event in events {
        let event_id = event.event_id();
        let report = bus.publish(event).await;
        tracing::debug!(%event_id, delivered = report.delivered, failed = report.failed, "event published");
        published.push(event_id);
    }
    if let Err(err) = store.mark_published(&published).await {
        // Entries stay pending and are re-published by the next outbox drain.
        tracing::warn!(error = %err, count = published.len(), "failed to mark events published");
    }
}

/// Re-publish outbox entries that were committed but never marked published.
///
/// Only entries whose claim has lapsed are taken, so events still being
/// delivered by their committer (or by another drain) are skipped.
/// Returns how many events were delivered to the bus.
pub async fn drain_outbox(store: &dyn DocumentStore, bus: &WarehouseBus, limit: usize) -> EngineResult<usize> {
    let pending = store.claim_unpublished(limit).await?;
    let count = pending.len();
    if count > 0 {
        tracing::info!(count, "re-publishing pending outbox events");
    }
    publish_committed(store, bus, pending).await;
    Ok(count)
}
