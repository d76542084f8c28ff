//! Postgres-backed store.
//!
//! ## Locking
//!
//! Reads through a [`PgTx`] use `SELECT … FOR UPDATE`, so two transactions
//! allocating from the same lots serialize on those rows. Document updates are
//! additionally conditioned on `version` in the `WHERE` clause.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (serialization failure) | `40001` | `Conflict` |
//! | Database (check constraint violation) | `23514` | `Corrupt` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use wareflow_approvals::ApprovalTier;
use wareflow_auth::Role;
use wareflow_core::{DocumentId, ItemId, LotId, ReservationId, WarehouseId};
use wareflow_documents::{
    Document, DocumentLine, DocumentStatus, DocumentType, InspectionResult, LineStatus,
};
use wareflow_inventory::{
    InventoryLot, LotAllocation, LotStatus, ReservationStatus, StockReservation,
};

use super::{DocumentStore, OUTBOX_LEASE, StoreResult, StoreTx};
use crate::error::StoreError;
use crate::events::WarehouseSystemEvent;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const DOCUMENT_COLUMNS: &str = r#"
    id, document_type, document_number, status, version, total_value,
    warehouse_id, destination_warehouse_id, project_id, reference_document_id,
    inspection_result, approval_level, notes, created_by, created_at, updated_at
"#;

const LOT_COLUMNS: &str = r#"
    id, item_id, warehouse_id, lot_number, source_document_id, initial_qty,
    available_qty, reserved_qty, unit_cost, status, received_at, version
"#;

const RESERVATION_COLUMNS: &str = r#"
    id, item_id, warehouse_id, consuming_document_id, quantity, lot_allocations,
    status, created_at, resolved_at
"#;

/// Postgres-backed document/lot store.
///
/// Uses the SQLx connection pool, which is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    outbox_lease: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            outbox_lease: OUTBOX_LEASE,
        }
    }

    /// Override how long committed or claimed outbox entries stay claimed.
    pub fn with_outbox_lease(mut self, lease: Duration) -> Self {
        self.outbox_lease = lease;
        self
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables if they do not exist.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conn(&self) -> StoreResult<sqlx::pool::PoolConnection<Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    enqueued: Vec<WarehouseSystemEvent>,
    outbox_lease: Duration,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn document(&mut self, id: DocumentId) -> StoreResult<Option<Document>> {
        load_document(&mut self.tx, id, true).await
    }

    async fn insert_document(&mut self, doc: &Document) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(doc.id.as_uuid())
        .bind(doc.document_type.as_str())
        .bind(&doc.document_number)
        .bind(doc.status.as_str())
        .bind(to_i64(doc.version, "version")?)
        .bind(to_i64(doc.total_value, "total_value")?)
        .bind(doc.warehouse_id.map(Uuid::from))
        .bind(doc.destination_warehouse_id.map(Uuid::from))
        .bind(doc.project_id.map(Uuid::from))
        .bind(doc.reference_document_id.map(Uuid::from))
        .bind(doc.inspection_result.map(|r| r.as_str()))
        .bind(doc.approval_level.map(|l| l as i32))
        .bind(&doc.notes)
        .bind(doc.created_by.as_uuid())
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;

        upsert_lines(&mut self.tx, doc).await
    }

    #[instrument(skip(self, doc), fields(document_id = %doc.id, version = doc.version), err)]
    async fn update_document(&mut self, doc: &Document, expected_version: u64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                status = $3,
                version = $4,
                total_value = $5,
                warehouse_id = $6,
                destination_warehouse_id = $7,
                project_id = $8,
                inspection_result = $9,
                approval_level = $10,
                notes = $11,
                updated_at = $12
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(doc.id.as_uuid())
        .bind(to_i64(expected_version, "version")?)
        .bind(doc.status.as_str())
        .bind(to_i64(doc.version, "version")?)
        .bind(to_i64(doc.total_value, "total_value")?)
        .bind(doc.warehouse_id.map(Uuid::from))
        .bind(doc.destination_warehouse_id.map(Uuid::from))
        .bind(doc.project_id.map(Uuid::from))
        .bind(doc.inspection_result.map(|r| r.as_str()))
        .bind(doc.approval_level.map(|l| l as i32))
        .bind(&doc.notes)
        .bind(doc.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_document", e))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM documents WHERE id = $1")
                .bind(doc.id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("update_document", e))?
                .is_some();
            return Err(if exists {
                StoreError::Conflict(format!(
                    "document {} is no longer at version {expected_version}",
                    doc.id
                ))
            } else {
                StoreError::NotFound(format!("document {}", doc.id))
            });
        }

        upsert_lines(&mut self.tx, doc).await
    }

    async fn find_by_reference(
        &mut self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> StoreResult<Option<Document>> {
        find_by_reference(&mut self.tx, reference_id, document_type).await
    }

    async fn lots_for_allocation(
        &mut self,
        item_id: ItemId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Vec<InventoryLot>> {
        load_lots(&mut self.tx, item_id, warehouse_id, true).await
    }

    async fn lot(&mut self, id: LotId) -> StoreResult<Option<InventoryLot>> {
        load_lot(&mut self.tx, id, true).await
    }

    async fn insert_lot(&mut self, lot: &InventoryLot) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO inventory_lots ({LOT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(lot.id.as_uuid())
        .bind(lot.item_id.as_uuid())
        .bind(lot.warehouse_id.as_uuid())
        .bind(&lot.lot_number)
        .bind(lot.source_document_id.map(Uuid::from))
        .bind(lot.initial_qty)
        .bind(lot.available_qty)
        .bind(lot.reserved_qty)
        .bind(to_i64(lot.unit_cost, "unit_cost")?)
        .bind(lot.status.as_str())
        .bind(lot.received_at)
        .bind(to_i64(lot.version, "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_lot", e))?;
        Ok(())
    }

    async fn update_lot(&mut self, lot: &InventoryLot) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_lots SET
                initial_qty = $2,
                available_qty = $3,
                reserved_qty = $4,
                status = $5,
                version = $6
            WHERE id = $1
            "#,
        )
        .bind(lot.id.as_uuid())
        .bind(lot.initial_qty)
        .bind(lot.available_qty)
        .bind(lot.reserved_qty)
        .bind(lot.status.as_str())
        .bind(to_i64(lot.version, "version")?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_lot", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("lot {}", lot.id)));
        }
        Ok(())
    }

    async fn reservation(&mut self, id: ReservationId) -> StoreResult<Option<StockReservation>> {
        load_reservation(&mut self.tx, id, true).await
    }

    async fn reservations_for_document(
        &mut self,
        document_id: DocumentId,
    ) -> StoreResult<Vec<StockReservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM stock_reservations \
             WHERE consuming_document_id = $1 ORDER BY created_at, id FOR UPDATE"
        ))
        .bind(document_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reservations_for_document", e))?;
        rows.iter().map(reservation_from_row).collect()
    }

    async fn insert_reservation(&mut self, r: &StockReservation) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO stock_reservations ({RESERVATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(r.id.as_uuid())
        .bind(r.item_id.as_uuid())
        .bind(r.warehouse_id.as_uuid())
        .bind(r.consuming_document_id.map(Uuid::from))
        .bind(r.quantity)
        .bind(allocations_json(&r.lot_allocations)?)
        .bind(r.status.as_str())
        .bind(r.created_at)
        .bind(r.resolved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_reservation", e))?;
        Ok(())
    }

    async fn update_reservation(&mut self, r: &StockReservation) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE stock_reservations SET status = $2, resolved_at = $3 WHERE id = $1",
        )
        .bind(r.id.as_uuid())
        .bind(r.status.as_str())
        .bind(r.resolved_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_reservation", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("reservation {}", r.id)));
        }
        Ok(())
    }

    async fn approval_tiers(&mut self, document_type: DocumentType) -> StoreResult<Vec<ApprovalTier>> {
        let rows = sqlx::query(
            "SELECT document_type, min_amount, max_amount, required_role \
             FROM approval_tiers WHERE document_type = $1 ORDER BY min_amount",
        )
        .bind(document_type.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("approval_tiers", e))?;
        rows.iter().map(tier_from_row).collect()
    }

    async fn enqueue(&mut self, event: WarehouseSystemEvent) -> StoreResult<()> {
        let body = serde_json::to_value(&event)
            .map_err(|e| StoreError::Corrupt(format!("event serialization failed: {e}")))?;
        sqlx::query(
            "INSERT INTO event_outbox \
             (event_id, event_type, entity_type, entity_id, event, occurred_at, claimed_until) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.event_id())
        .bind(event.event_type())
        .bind(event.entity_type())
        .bind(event.entity_id())
        .bind(body)
        .bind(event.occurred_at())
        // Claimed by the committer, which publishes right after commit.
        .bind(lease_end(self.outbox_lease))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;
        self.enqueued.push(event);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<Vec<WarehouseSystemEvent>> {
        let PgTx { tx, enqueued, .. } = *self;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(enqueued)
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PgTx {
            tx,
            enqueued: Vec::new(),
            outbox_lease: self.outbox_lease,
        }))
    }

    #[instrument(skip(self), err)]
    async fn next_sequence(&self, document_type: DocumentType, year: i32) -> StoreResult<u64> {
        let row = sqlx::query(
            r#"
            INSERT INTO document_counters (document_type, year, last_number)
            VALUES ($1, $2, 1)
            ON CONFLICT (document_type, year)
            DO UPDATE SET last_number = document_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(document_type.as_str())
        .bind(year)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_sequence", e))?;
        let n: i64 = row.try_get("last_number").map_err(corrupt)?;
        to_u64(n, "last_number")
    }

    async fn document(&self, id: DocumentId) -> StoreResult<Option<Document>> {
        let mut conn = self.conn().await?;
        load_document(&mut conn, id, false).await
    }

    async fn find_by_reference(
        &self,
        reference_id: DocumentId,
        document_type: DocumentType,
    ) -> StoreResult<Option<Document>> {
        let mut conn = self.conn().await?;
        find_by_reference(&mut conn, reference_id, document_type).await
    }

    async fn lot(&self, id: LotId) -> StoreResult<Option<InventoryLot>> {
        let mut conn = self.conn().await?;
        load_lot(&mut conn, id, false).await
    }

    async fn lots(&self, item_id: ItemId, warehouse_id: WarehouseId) -> StoreResult<Vec<InventoryLot>> {
        let mut conn = self.conn().await?;
        load_lots(&mut conn, item_id, warehouse_id, false).await
    }

    async fn reservation(&self, id: ReservationId) -> StoreResult<Option<StockReservation>> {
        let mut conn = self.conn().await?;
        load_reservation(&mut conn, id, false).await
    }

    async fn all_approval_tiers(&self) -> StoreResult<Vec<ApprovalTier>> {
        let rows = sqlx::query(
            "SELECT document_type, min_amount, max_amount, required_role \
             FROM approval_tiers ORDER BY document_type, min_amount",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("all_approval_tiers", e))?;
        rows.iter().map(tier_from_row).collect()
    }

    async fn replace_approval_tiers(
        &self,
        document_type: DocumentType,
        tiers: Vec<ApprovalTier>,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("DELETE FROM approval_tiers WHERE document_type = $1")
            .bind(document_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_approval_tiers", e))?;
        for tier in &tiers {
            sqlx::query(
                "INSERT INTO approval_tiers (document_type, min_amount, max_amount, required_role) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(document_type.as_str())
            .bind(to_i64(tier.min_amount, "min_amount")?)
            .bind(tier.max_amount.map(|m| to_i64(m, "max_amount")).transpose()?)
            .bind(tier.required_role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("replace_approval_tiers", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn mark_published(&self, event_ids: &[Uuid]) -> StoreResult<()> {
        if event_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE event_outbox SET published_at = now() WHERE event_id = ANY($1)")
            .bind(event_ids)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_published", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn claim_unpublished(&self, limit: usize) -> StoreResult<Vec<WarehouseSystemEvent>> {
        let rows = sqlx::query(
            r#"
            UPDATE event_outbox SET claimed_until = $2
            WHERE event_id IN (
                SELECT event_id FROM event_outbox
                WHERE published_at IS NULL
                  AND (claimed_until IS NULL OR claimed_until <= now())
                ORDER BY occurred_at, event_id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING event_id, occurred_at, event
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(lease_end(self.outbox_lease))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_unpublished", e))?;

        let mut claimed = rows
            .iter()
            .map(|row| {
                let event_id: Uuid = row.try_get("event_id").map_err(corrupt)?;
                let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(corrupt)?;
                let body: serde_json::Value = row.try_get("event").map_err(corrupt)?;
                let event: WarehouseSystemEvent = serde_json::from_value(body)
                    .map_err(|e| StoreError::Corrupt(format!("outbox event: {e}")))?;
                Ok((occurred_at, event_id, event))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        // RETURNING does not preserve the subquery's order.
        claimed.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Ok(claimed.into_iter().map(|(_, _, event)| event).collect())
    }
}

// Shared query helpers (work on a pooled connection or a transaction).

fn lock_clause(lock: bool) -> &'static str {
    if lock { " FOR UPDATE" } else { "" }
}

async fn load_document(
    conn: &mut PgConnection,
    id: DocumentId,
    lock: bool,
) -> StoreResult<Option<Document>> {
    let row = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1{}",
        lock_clause(lock)
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_document", e))?;

    let Some(row) = row else {
        return Ok(None);
    };

    let lines = sqlx::query(
        "SELECT id, document_id, item_id, quantity, unit_cost, line_status \
         FROM document_lines WHERE document_id = $1 ORDER BY position",
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_document_lines", e))?;

    let lines = lines.iter().map(line_from_row).collect::<StoreResult<Vec<_>>>()?;
    document_from_row(&row, lines).map(Some)
}

async fn find_by_reference(
    conn: &mut PgConnection,
    reference_id: DocumentId,
    document_type: DocumentType,
) -> StoreResult<Option<Document>> {
    let row = sqlx::query(
        "SELECT id FROM documents WHERE reference_document_id = $1 AND document_type = $2 \
         ORDER BY created_at, id LIMIT 1",
    )
    .bind(reference_id.as_uuid())
    .bind(document_type.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("find_by_reference", e))?;

    match row {
        Some(row) => {
            let id: Uuid = row.try_get("id").map_err(corrupt)?;
            load_document(conn, DocumentId::from_uuid(id), false).await
        }
        None => Ok(None),
    }
}

async fn upsert_lines(conn: &mut PgConnection, doc: &Document) -> StoreResult<()> {
    for (position, line) in doc.lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO document_lines (id, document_id, position, item_id, quantity, unit_cost, line_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                unit_cost = EXCLUDED.unit_cost,
                line_status = EXCLUDED.line_status
            "#,
        )
        .bind(line.id.as_uuid())
        .bind(doc.id.as_uuid())
        .bind(position as i32)
        .bind(line.item_id.as_uuid())
        .bind(line.quantity)
        .bind(to_i64(line.unit_cost, "unit_cost")?)
        .bind(line.line_status.as_str())
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("upsert_line", e))?;
    }
    Ok(())
}

async fn load_lot(conn: &mut PgConnection, id: LotId, lock: bool) -> StoreResult<Option<InventoryLot>> {
    let row = sqlx::query(&format!(
        "SELECT {LOT_COLUMNS} FROM inventory_lots WHERE id = $1{}",
        lock_clause(lock)
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_lot", e))?;
    row.as_ref().map(lot_from_row).transpose()
}

async fn load_lots(
    conn: &mut PgConnection,
    item_id: ItemId,
    warehouse_id: WarehouseId,
    lock: bool,
) -> StoreResult<Vec<InventoryLot>> {
    let rows = sqlx::query(&format!(
        "SELECT {LOT_COLUMNS} FROM inventory_lots \
         WHERE item_id = $1 AND warehouse_id = $2 ORDER BY received_at, id{}",
        lock_clause(lock)
    ))
    .bind(item_id.as_uuid())
    .bind(warehouse_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_lots", e))?;
    rows.iter().map(lot_from_row).collect()
}

async fn load_reservation(
    conn: &mut PgConnection,
    id: ReservationId,
    lock: bool,
) -> StoreResult<Option<StockReservation>> {
    let row = sqlx::query(&format!(
        "SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE id = $1{}",
        lock_clause(lock)
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_reservation", e))?;
    row.as_ref().map(reservation_from_row).transpose()
}

// Row mapping

fn document_from_row(row: &PgRow, lines: Vec<DocumentLine>) -> StoreResult<Document> {
    let document_type: String = row.try_get("document_type").map_err(corrupt)?;
    let status: String = row.try_get("status").map_err(corrupt)?;
    let inspection_result: Option<String> = row.try_get("inspection_result").map_err(corrupt)?;
    let approval_level: Option<i32> = row.try_get("approval_level").map_err(corrupt)?;

    Ok(Document {
        id: DocumentId::from_uuid(row.try_get("id").map_err(corrupt)?),
        document_type: DocumentType::parse(&document_type).map_err(corrupt)?,
        document_number: row.try_get("document_number").map_err(corrupt)?,
        status: DocumentStatus::parse(&status).map_err(corrupt)?,
        version: to_u64(row.try_get("version").map_err(corrupt)?, "version")?,
        total_value: to_u64(row.try_get("total_value").map_err(corrupt)?, "total_value")?,
        warehouse_id: opt_id(row, "warehouse_id")?,
        destination_warehouse_id: opt_id(row, "destination_warehouse_id")?,
        project_id: opt_id(row, "project_id")?,
        reference_document_id: opt_id(row, "reference_document_id")?,
        inspection_result: inspection_result
            .as_deref()
            .map(InspectionResult::parse)
            .transpose()
            .map_err(corrupt)?,
        approval_level: approval_level.map(|l| l as u32),
        notes: row.try_get("notes").map_err(corrupt)?,
        lines,
        created_by: row.try_get::<Uuid, _>("created_by").map_err(corrupt)?.into(),
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

fn line_from_row(row: &PgRow) -> StoreResult<DocumentLine> {
    let status: String = row.try_get("line_status").map_err(corrupt)?;
    Ok(DocumentLine {
        id: row.try_get::<Uuid, _>("id").map_err(corrupt)?.into(),
        document_id: row.try_get::<Uuid, _>("document_id").map_err(corrupt)?.into(),
        item_id: row.try_get::<Uuid, _>("item_id").map_err(corrupt)?.into(),
        quantity: row.try_get("quantity").map_err(corrupt)?,
        unit_cost: to_u64(row.try_get("unit_cost").map_err(corrupt)?, "unit_cost")?,
        line_status: LineStatus::parse(&status).map_err(corrupt)?,
    })
}

fn lot_from_row(row: &PgRow) -> StoreResult<InventoryLot> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    Ok(InventoryLot {
        id: row.try_get::<Uuid, _>("id").map_err(corrupt)?.into(),
        item_id: row.try_get::<Uuid, _>("item_id").map_err(corrupt)?.into(),
        warehouse_id: row.try_get::<Uuid, _>("warehouse_id").map_err(corrupt)?.into(),
        lot_number: row.try_get("lot_number").map_err(corrupt)?,
        source_document_id: opt_id(row, "source_document_id")?,
        initial_qty: row.try_get("initial_qty").map_err(corrupt)?,
        available_qty: row.try_get("available_qty").map_err(corrupt)?,
        reserved_qty: row.try_get("reserved_qty").map_err(corrupt)?,
        unit_cost: to_u64(row.try_get("unit_cost").map_err(corrupt)?, "unit_cost")?,
        status: LotStatus::parse(&status).map_err(corrupt)?,
        received_at: row.try_get("received_at").map_err(corrupt)?,
        version: to_u64(row.try_get("version").map_err(corrupt)?, "version")?,
    })
}

fn reservation_from_row(row: &PgRow) -> StoreResult<StockReservation> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let allocations: serde_json::Value = row.try_get("lot_allocations").map_err(corrupt)?;
    Ok(StockReservation {
        id: row.try_get::<Uuid, _>("id").map_err(corrupt)?.into(),
        item_id: row.try_get::<Uuid, _>("item_id").map_err(corrupt)?.into(),
        warehouse_id: row.try_get::<Uuid, _>("warehouse_id").map_err(corrupt)?.into(),
        consuming_document_id: opt_id(row, "consuming_document_id")?,
        quantity: row.try_get("quantity").map_err(corrupt)?,
        lot_allocations: serde_json::from_value::<Vec<LotAllocation>>(allocations)
            .map_err(corrupt)?,
        status: ReservationStatus::parse(&status).map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        resolved_at: row.try_get("resolved_at").map_err(corrupt)?,
    })
}

fn tier_from_row(row: &PgRow) -> StoreResult<ApprovalTier> {
    let document_type: String = row.try_get("document_type").map_err(corrupt)?;
    let max_amount: Option<i64> = row.try_get("max_amount").map_err(corrupt)?;
    let required_role: String = row.try_get("required_role").map_err(corrupt)?;
    Ok(ApprovalTier {
        document_type: DocumentType::parse(&document_type).map_err(corrupt)?,
        min_amount: to_u64(row.try_get("min_amount").map_err(corrupt)?, "min_amount")?,
        max_amount: max_amount.map(|m| to_u64(m, "max_amount")).transpose()?,
        required_role: Role::new(required_role),
    })
}

fn opt_id<T: From<Uuid>>(row: &PgRow, column: &str) -> StoreResult<Option<T>> {
    let value: Option<Uuid> = row.try_get(column).map_err(corrupt)?;
    Ok(value.map(T::from))
}

fn allocations_json(allocations: &[LotAllocation]) -> StoreResult<serde_json::Value> {
    serde_json::to_value(allocations)
        .map_err(|e| StoreError::Corrupt(format!("allocation serialization failed: {e}")))
}

fn to_i64(value: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} {value} exceeds BIGINT")))
}

fn to_u64(value: i64, what: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} {value} is negative")))
}

fn lease_end(lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| Utc::now().checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn corrupt(err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation / serialization failure / deadlock
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                // Check constraint violation
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {}", operation)),
        other => StoreError::Backend(format!("error in {}: {}", operation, other)),
    }
}
