use anyhow::Context;
use cloakscope_core::AppConfig;
use cloakscope_db::Database;
use cloakscope_server::{build_router, init_tracing, AppState};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Cloakscope v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env().context("failed to load configuration")?;

    let db = Database::new(&config.server.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.server.database_path.display()))?;
    db.run_migrations().await.context("failed to run migrations")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::from_config(config, db)?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
