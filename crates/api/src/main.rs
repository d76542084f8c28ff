use anyhow::Context;

use wareflow_infra::EngineConfig;

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wareflow_observability::init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let bind = std::env::var("WAREFLOW_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let database_url = std::env::var("DATABASE_URL").ok();
    let config = EngineConfig::from_env().context("loading engine configuration")?;

    let app = wareflow_api::app::build_app(jwt_secret, config, database_url.as_deref()).await?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
