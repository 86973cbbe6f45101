use std::sync::Arc;

use tracing::info;

use parley_db::Database;
use parley_gateway::Hub;
use parley_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley=debug,parley_server=debug,parley_gateway=debug,parley_api=debug,parley_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let app = parley_server::build_router(&config, db, Hub::new());

    let addr = config.socket_addr()?;
    info!("Parley server listening on {} (sender policy: {:?})", addr, config.sender_policy);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
