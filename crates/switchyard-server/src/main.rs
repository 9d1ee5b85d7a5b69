// Switchyard server entry point

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use switchyard::pool::{
    ConnectionFactory, InMemoryConnectionFactory, PgConnectionFactory, RecordStore,
};
use switchyard_server::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "switchyard_server=debug,switchyard=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("switchyard-server starting...");

    let config = ServerConfig::from_env();
    tracing::info!(
        worker_id = config.queue.worker_id,
        pool_max = config.pool.max_size,
        consumers = config.queue.consumer_count,
        "Configuration loaded"
    );

    match config.database_url.clone() {
        Some(url) => {
            let factory = PgConnectionFactory::new(url);
            factory
                .ensure_schema()
                .await
                .context("Failed to prepare database schema")?;
            tracing::info!("Connected to database");
            serve(config, factory).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory record store");
            serve(config, InMemoryConnectionFactory::new()).await
        }
    }
}

async fn serve<F>(config: ServerConfig, factory: F) -> Result<()>
where
    F: ConnectionFactory,
    F::Connection: RecordStore,
{
    let state = switchyard_server::build_state(&config, factory).await?;
    let app = switchyard_server::router(state.clone(), &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    switchyard_server::shutdown(&state).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Received shutdown signal");
}
