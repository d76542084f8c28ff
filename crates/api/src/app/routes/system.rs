use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, sse::Event as SseEvent},
};

use wareflow_auth::Actor;

use crate::app::services::{self, AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(actor): Extension<Actor>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": actor.id.to_string(),
        "role": actor.role.as_str(),
        "warehouse_id": actor.scope_warehouse_id,
        "project_id": actor.scope_project_id,
    }))
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::notification_sse_stream(services)
}
