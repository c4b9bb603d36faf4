use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podcache::config::Config;
use podcache::db::Database;
use podcache::fetcher::{http_client, Fetcher};
use podcache::library::Library;
use podcache::routes::{self, AppState};
use podcache::search::SearchClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "podcache=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("PODCACHE_CONFIG").unwrap_or_else(|_| "podcache.toml".to_string());
    let mut config = Config::load_or_default(&config_path)?;
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        config.database_url = database_url;
    }

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    info!("Database initialized");
    let db = Arc::new(db);

    let client = http_client(&config)?;
    let library = Arc::new(Library::new(db.clone(), Arc::new(Fetcher::new(client.clone()))));
    let search = Arc::new(SearchClient::new(client, config.search_url.clone()));

    let app = routes::router(Arc::new(AppState { library, search }));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server starting on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
