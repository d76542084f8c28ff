use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use wareflow_auth::Actor;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const RESOURCE: &str = "approval_tier";

pub fn router() -> Router {
    Router::new()
        .route("/:doc_type/preview", get(preview))
        .route("/:doc_type/tiers", get(get_tiers).put(replace_tiers))
}

/// GET /approvals/:type/preview?amount=N
///
/// Which role would have to approve a document of this type and value.
pub async fn preview(
    Extension(services): Extension<Arc<AppServices>>,
    Path(doc_type): Path<String>,
    Query(query): Query<dto::PreviewQuery>,
) -> axum::response::Response {
    let document_type = match dto::parse_document_type(&doc_type) {
        Ok(t) => t,
        Err(res) => return res,
    };

    match services.engine().approvals().preview(document_type, query.amount).await {
        Ok(requirement) => (StatusCode::OK, Json(requirement)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_tiers(
    Extension(services): Extension<Arc<AppServices>>,
    Path(doc_type): Path<String>,
) -> axum::response::Response {
    let document_type = match dto::parse_document_type(&doc_type) {
        Ok(t) => t,
        Err(res) => return res,
    };

    match services.engine().approvals().tiers(document_type).await {
        Ok(tiers) => (StatusCode::OK, Json(tiers)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn replace_tiers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(doc_type): Path<String>,
    Json(body): Json<dto::ReplaceTiersRequest>,
) -> axum::response::Response {
    let document_type = match dto::parse_document_type(&doc_type) {
        Ok(t) => t,
        Err(res) => return res,
    };
    if let Err(res) = services.authorize(&actor, RESOURCE, "update") {
        return res;
    }

    let approvals = services.engine().approvals();
    if let Err(e) = approvals.replace_tiers(document_type, body.tiers).await {
        return errors::engine_error_to_response(e);
    }
    tracing::info!(%document_type, actor_id = %actor.id, "approval tiers updated");

    match approvals.tiers(document_type).await {
        Ok(tiers) => (StatusCode::OK, Json(tiers)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
