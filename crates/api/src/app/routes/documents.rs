use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use wareflow_auth::Actor;
use wareflow_core::DocumentId;
use wareflow_documents::{Document, DocumentType, NewDocument};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:doc_type", post(create_document))
        .route("/:doc_type/workflow", get(get_workflow))
        .route("/:doc_type/:id", get(get_document))
        .route("/:doc_type/:id/lines", post(add_line))
        .route("/:doc_type/:id/transitions", post(transition))
        .route("/:doc_type/:id/actions", get(get_actions))
}

pub async fn create_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(doc_type): Path<String>,
    Json(body): Json<NewDocument>,
) -> axum::response::Response {
    let document_type = match dto::parse_document_type(&doc_type) {
        Ok(t) => t,
        Err(res) => return res,
    };

    match services.engine().create(document_type, body, &actor).await {
        Ok(doc) => (StatusCode::CREATED, Json(doc)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_document(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path((doc_type, id)): Path<(String, String)>,
) -> axum::response::Response {
    match load_readable(&services, &actor, &doc_type, &id).await {
        Ok(doc) => (StatusCode::OK, Json(doc)).into_response(),
        Err(res) => res,
    }
}

pub async fn add_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path((doc_type, id)): Path<(String, String)>,
    Json(body): Json<dto::AddLineRequest>,
) -> axum::response::Response {
    let mut doc = match load(&services, &doc_type, &id).await {
        Ok(doc) => doc,
        Err(res) => return res,
    };
    doc.version = body.version;

    match services.engine().add_line(&doc, body.line, &actor).await {
        Ok(doc) => (StatusCode::OK, Json(doc)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// POST /documents/:type/:id/transitions
///
/// The body's `version` must match the stored document; a stale one yields 409
/// and the client should re-read before retrying.
pub async fn transition(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path((doc_type, id)): Path<(String, String)>,
    Json(body): Json<dto::TransitionRequest>,
) -> axum::response::Response {
    let input = match body.to_input() {
        Ok(input) => input,
        Err(res) => return res,
    };
    let mut doc = match load(&services, &doc_type, &id).await {
        Ok(doc) => doc,
        Err(res) => return res,
    };
    doc.version = body.version;

    match services.engine().transition(&doc, input, &actor).await {
        Ok(doc) => (StatusCode::OK, Json(doc)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_actions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path((doc_type, id)): Path<(String, String)>,
) -> axum::response::Response {
    let doc = match load_readable(&services, &actor, &doc_type, &id).await {
        Ok(doc) => doc,
        Err(res) => return res,
    };
    let engine = services.engine();
    let actions = engine
        .allowed_actions(&doc)
        .and_then(|allowed| Ok((allowed, engine.available_actions(&doc, &actor)?)));

    match actions {
        Ok((allowed, available)) => (
            StatusCode::OK,
            Json(dto::ActionsResponse {
                document_id: doc.id.to_string(),
                status: doc.status.to_string(),
                version: doc.version,
                allowed,
                available,
            }),
        )
            .into_response(),
        Err(e) => errors::domain_error_to_response(e),
    }
}

/// The transition table of one document type.
pub async fn get_workflow(
    Extension(services): Extension<Arc<AppServices>>,
    Path(doc_type): Path<String>,
) -> axum::response::Response {
    let document_type = match dto::parse_document_type(&doc_type) {
        Ok(t) => t,
        Err(res) => return res,
    };
    let workflow = match services.engine().workflow(document_type) {
        Ok(w) => w,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let transitions: Vec<serde_json::Value> = workflow
        .rows()
        .map(|(from, action, spec)| {
            serde_json::json!({
                "from": from,
                "action": action,
                "to": spec.to,
                "roles": spec.allowed_roles,
                "approval_gated": spec.approval_gated,
                "effect": spec.effect,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "document_type": document_type,
            "prefix": document_type.prefix(),
            "states": workflow.states(),
            "editable": workflow.editable,
            "create_roles": workflow.create_roles,
            "transitions": transitions,
        })),
    )
        .into_response()
}

async fn load(services: &AppServices, doc_type: &str, id: &str) -> Result<Document, axum::response::Response> {
    let document_type: DocumentType = dto::parse_document_type(doc_type)?;
    let id: DocumentId = dto::parse_id(id, "document")?;

    let doc = services
        .engine()
        .get(id)
        .await
        .map_err(errors::engine_error_to_response)?;
    // A document addressed under the wrong type does not exist at that path.
    if doc.document_type != document_type {
        return Err(errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("{document_type} {id} not found"),
        ));
    }
    Ok(doc)
}

async fn load_readable(
    services: &AppServices,
    actor: &Actor,
    doc_type: &str,
    id: &str,
) -> Result<Document, axum::response::Response> {
    let doc = load(services, doc_type, id).await?;
    services.authorize(actor, doc.document_type.resource(), "read")?;
    services
        .engine()
        .workflow(doc.document_type)
        .and_then(|w| w.scope.check(actor, &doc))
        .map_err(errors::domain_error_to_response)?;
    Ok(doc)
}
