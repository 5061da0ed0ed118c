use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::routes;
use crate::state::AppState;

pub fn build_router(ctx: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(routes::health::health))
        // Streams
        .route("/api/streams", get(routes::streams::list_streams))
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind the proxy API. Split from `serve` so callers can learn the bound port.
pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind((host, port)).await
}

pub async fn serve(listener: TcpListener, ctx: AppState) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!("[StreamFlow API] Running on http://{}", addr);
    info!("[StreamFlow API] MediaMTX API: {}", ctx.mediamtx.api_base());
    axum::serve(listener, build_router(ctx)).await
}
