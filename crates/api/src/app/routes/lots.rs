use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use wareflow_auth::Actor;
use wareflow_core::{DomainError, LotId, ReservationId, WarehouseId};
use wareflow_inventory::{InventoryLot, NewLot};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const RESOURCE: &str = "inventory_lot";

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_lots).post(receive_lot))
        .route("/on-hand", get(on_hand))
        .route("/reservations/:id", get(get_reservation))
        .route("/:id", get(get_lot))
        .route("/:id/block", post(block_lot))
        .route("/:id/unblock", post(unblock_lot))
        .route("/:id/expire", post(expire_lot))
}

pub async fn list_lots(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<dto::StockQuery>,
) -> axum::response::Response {
    if let Err(res) = guard(&services, &actor, "read", query.warehouse_id) {
        return res;
    }

    match services.ledger().lots(query.item_id, query.warehouse_id).await {
        Ok(lots) => (StatusCode::OK, Json(lots)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn on_hand(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<dto::StockQuery>,
) -> axum::response::Response {
    if let Err(res) = guard(&services, &actor, "read", query.warehouse_id) {
        return res;
    }

    match services.ledger().on_hand(query.item_id, query.warehouse_id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// POST /lots
///
/// Direct receipt outside a goods-receipt document (opening balances,
/// corrections).
pub async fn receive_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Json(body): Json<NewLot>,
) -> axum::response::Response {
    if let Err(res) = guard(&services, &actor, "create", body.warehouse_id) {
        return res;
    }

    match services.ledger().receive(body, Some(actor.id)).await {
        Ok(lot) => (StatusCode::CREATED, Json(lot)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match load_guarded(&services, &actor, &id, "read").await {
        Ok(lot) => (StatusCode::OK, Json(lot)).into_response(),
        Err(res) => res,
    }
}

pub async fn get_reservation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ReservationId = match dto::parse_id(&id, "reservation") {
        Ok(id) => id,
        Err(res) => return res,
    };
    let reservation = match services.ledger().reservation(id).await {
        Ok(r) => r,
        Err(e) => return errors::engine_error_to_response(e),
    };
    if let Err(res) = guard(&services, &actor, "read", reservation.warehouse_id) {
        return res;
    }
    (StatusCode::OK, Json(reservation)).into_response()
}

pub async fn block_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let lot = match load_guarded(&services, &actor, &id, "block").await {
        Ok(lot) => lot,
        Err(res) => return res,
    };
    respond(services.ledger().block(lot.id, Some(actor.id)).await)
}

pub async fn unblock_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let lot = match load_guarded(&services, &actor, &id, "unblock").await {
        Ok(lot) => lot,
        Err(res) => return res,
    };
    respond(services.ledger().unblock(lot.id, Some(actor.id)).await)
}

pub async fn expire_lot(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let lot = match load_guarded(&services, &actor, &id, "expire").await {
        Ok(lot) => lot,
        Err(res) => return res,
    };
    respond(services.ledger().expire(lot.id, Some(actor.id)).await)
}

fn respond(result: wareflow_infra::EngineResult<InventoryLot>) -> axum::response::Response {
    match result {
        Ok(lot) => (StatusCode::OK, Json(lot)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

async fn load_guarded(
    services: &AppServices,
    actor: &Actor,
    id: &str,
    action: &str,
) -> Result<InventoryLot, axum::response::Response> {
    let id: LotId = dto::parse_id(id, "lot")?;
    let lot = services
        .ledger()
        .lot(id)
        .await
        .map_err(errors::engine_error_to_response)?;
    guard(services, actor, action, lot.warehouse_id)?;
    Ok(lot)
}

/// Permission on `inventory_lot` plus the actor's warehouse assignment.
fn guard(
    services: &AppServices,
    actor: &Actor,
    action: &str,
    warehouse_id: WarehouseId,
) -> Result<(), axum::response::Response> {
    services.authorize(actor, RESOURCE, action)?;
    if !actor.can_access_warehouse(Some(warehouse_id)) {
        return Err(errors::domain_error_to_response(DomainError::forbidden(format!(
            "actor {} is not assigned to warehouse {warehouse_id}",
            actor.id
        ))));
    }
    Ok(())
}
