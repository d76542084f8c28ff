use std::{convert::Infallible, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use wareflow_auth::{Actor, StaticPermissions};
use wareflow_documents::DocumentType;
use wareflow_infra::{
    DocumentEngine, DocumentStore, EngineConfig, InMemoryStore, LotLedger, PgStore, WarehouseBus,
    orchestrator::{self, BroadcastNotifier, TracingAuditSink},
};

use crate::app::errors;

const NOTIFICATION_CAPACITY: usize = 1024;
const PG_MAX_CONNECTIONS: u32 = 10;
const MAINTENANCE_PERIOD: Duration = Duration::from_secs(5);

/// Everything the handlers share.
pub struct AppServices {
    engine: Arc<DocumentEngine>,
    notifier: Arc<BroadcastNotifier>,
}

/// Postgres when `database_url` is set, in-memory otherwise.
pub async fn build_services(config: &EngineConfig, database_url: Option<&str>) -> anyhow::Result<AppServices> {
    config.validate().context("invalid engine configuration")?;

    let Some(url) = database_url else {
        tracing::info!("DATABASE_URL not set; using the in-memory store");
        return Ok(in_memory(config));
    };

    let store = PgStore::connect(url, PG_MAX_CONNECTIONS)
        .await
        .context("connecting to postgres")?;
    store.migrate().await.context("applying migrations")?;

    let services = assemble(Arc::new(store), config);
    seed_tiers(&services, config).await?;
    services
        .engine
        .publish_pending()
        .await
        .context("draining outbox at startup")?;
    Ok(services)
}

pub fn in_memory(config: &EngineConfig) -> AppServices {
    let store = InMemoryStore::with_tiers(config.approval_tiers.clone());
    assemble(Arc::new(store), config)
}

fn assemble(store: Arc<dyn DocumentStore>, config: &EngineConfig) -> AppServices {
    let bus = Arc::new(WarehouseBus::new());
    let engine = Arc::new(DocumentEngine::new(
        store,
        bus,
        Arc::new(StaticPermissions::warehouse_defaults()),
        config,
    ));
    let notifier = Arc::new(BroadcastNotifier::new(NOTIFICATION_CAPACITY));
    orchestrator::wire(
        &engine,
        config.system_actor(),
        Arc::new(TracingAuditSink),
        notifier.clone(),
    );
    AppServices { engine, notifier }
}

/// Write the configured tiers for types the database has none for.
async fn seed_tiers(services: &AppServices, config: &EngineConfig) -> anyhow::Result<()> {
    let approvals = services.engine.approvals();
    for document_type in DocumentType::ALL.iter().copied() {
        let wanted: Vec<_> = config
            .approval_tiers
            .iter()
            .filter(|t| t.document_type == document_type)
            .cloned()
            .collect();
        if wanted.is_empty() {
            continue;
        }
        if approvals.tiers(document_type).await?.is_empty() {
            approvals.replace_tiers(document_type, wanted).await?;
            tracing::info!(%document_type, "seeded approval tiers");
        }
    }
    Ok(())
}

impl AppServices {
    pub fn engine(&self) -> &Arc<DocumentEngine> {
        &self.engine
    }

    pub fn ledger(&self) -> LotLedger {
        self.engine.ledger()
    }

    /// Permission check for routes outside the document workflows.
    pub fn authorize(
        &self,
        actor: &Actor,
        resource: &str,
        action: &str,
    ) -> Result<(), axum::response::Response> {
        if self.engine.permissions().authorize(&actor.role, resource, action) {
            return Ok(());
        }
        Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            format!("role {} lacks permission {resource}.{action}", actor.role),
        ))
    }

    /// Periodically re-publish outbox leftovers and re-drive failed deliveries.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let services = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_PERIOD);
            loop {
                ticker.tick().await;
                let Some(services) = services.upgrade() else {
                    break;
                };
                match services.engine.publish_pending().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(published = n, "republished outbox entries"),
                    Err(e) => tracing::warn!(error = %e, "outbox drain failed"),
                }
                if !services.engine.bus().failures().is_empty() {
                    let report = services.engine.bus().redrive_failures().await;
                    tracing::info!(
                        delivered = report.delivered,
                        failed = report.failed,
                        "re-drove failed deliveries"
                    );
                }
            }
        })
    }
}

/// Build the notification SSE stream (used by `/stream`).
pub fn notification_sse_stream(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.notifier.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(n) => {
            let data = serde_json::to_string(&n).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(n.event_type).data(data)))
        }
        Err(lagged) => {
            tracing::debug!(error = %lagged, "sse receiver lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
