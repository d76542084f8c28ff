use axum::{Router, routing::get};

pub mod approvals;
pub mod documents;
pub mod lots;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/documents", documents::router())
        .nest("/approvals", approvals::router())
        .nest("/lots", lots::router())
}
