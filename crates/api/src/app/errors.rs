use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use wareflow_core::DomainError;
use wareflow_infra::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Domain(e) => domain_error_to_response(e),
        EngineError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

/// Business outcomes map onto statuses the client can act on.
///
/// 409 means re-read and retry (or pick another action), 422 means the request
/// is well formed but the domain refuses it.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::InvalidTransition { from, action, allowed } => json_error_with(
            StatusCode::CONFLICT,
            "invalid_transition",
            message,
            json!({ "from": from, "action": action, "allowed": allowed }),
        ),
        DomainError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        DomainError::AlreadyReleased(id) => json_error_with(
            StatusCode::CONFLICT,
            "already_released",
            message,
            json!({ "reservation_id": id }),
        ),
        DomainError::AlreadyConsumed(id) => json_error_with(
            StatusCode::CONFLICT,
            "already_consumed",
            message,
            json!({ "reservation_id": id }),
        ),
        DomainError::Forbidden(_) => json_error(StatusCode::FORBIDDEN, "forbidden", message),
        DomainError::InsufficientStock {
            item_id,
            warehouse_id,
            requested,
            available,
        } => json_error_with(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_stock",
            message,
            json!({
                "item_id": item_id,
                "warehouse_id": warehouse_id,
                "requested": requested,
                "available": available,
            }),
        ),
        DomainError::Validation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", message)
        }
        DomainError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn json_error_with(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    details: serde_json::Value,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "details": details,
        })),
    )
        .into_response()
}
