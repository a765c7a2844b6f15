pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::WebConfig;
use self::state::AppState;

/// Binds the listener and serves the API until Ctrl-C.
pub async fn run_server(config: WebConfig, state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, routes::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            // Without a signal handler the server runs until killed
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await
        }
    }
}
