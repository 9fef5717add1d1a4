mod handlers;
mod state;

use axum::Router;
use axum::routing::get;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::geocode::AddressResolver;

pub fn build_router(resolver: AddressResolver) -> Router {
    let state = Arc::new(AppState { resolver });

    Router::new()
        .route("/whereami", get(handlers::whereami))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, resolver: AddressResolver) -> std::io::Result<()> {
    let app = build_router(resolver);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Reverse geocoder listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            warn!("Cannot listen for Ctrl+C, running until killed: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
