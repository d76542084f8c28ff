//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: engine, store and orchestration wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and path parsing
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use wareflow_infra::EngineConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(
    jwt_secret: String,
    config: EngineConfig,
    database_url: Option<&str>,
) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(&config, database_url).await?);
    services.spawn_maintenance();
    Ok(router(services, jwt_secret))
}

/// Router over already-built services.
pub fn router(services: Arc<services::AppServices>, jwt_secret: String) -> Router {
    let jwt = Arc::new(wareflow_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a valid bearer token.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
