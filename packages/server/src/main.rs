use std::sync::Arc;

use tracing::{Level, info};

use server::config::AppConfig;
use server::database;
use server::state::AppState;
use server::sync::ApplierRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = AppConfig::load()?;

    let db = database::init_db(&config.database.url).await?;
    info!("Database connected and schema synced");

    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState {
        db,
        appliers: Arc::new(ApplierRegistry::new()),
        config,
    };

    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
