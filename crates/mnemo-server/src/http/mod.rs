//! Inbound HTTP surface (§6).
//!
//! Mirrors the endpoint set verbatim: `/chat` streams over SSE; the rest are
//! thin JSON reads/writes over [`mnemo_core::Storage`].

mod chat;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use mnemo_core::Storage;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::EngineConfig;
use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub storage: Arc<Storage>,
    pub config: Arc<EngineConfig>,
    pub orchestrator: Orchestrator,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(chat::router())
        .merge(routes::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until ctrl-c or SIGTERM, matching the corpus's graceful
/// shutdown convention.
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let app = build_router(state);
    info!("mnemo-server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("mnemo-server shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
