//! HTTP Server implementation

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

use lineagent_webhook::create_webhook_router;

use crate::app::AppState;
use crate::cli::Args;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Self {
        Self { args, state }
    }

    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(self.args.host, self.args.port);

        let app = build_http_router(&self.state);

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind HTTP server")?;

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

fn build_http_router(state: &AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(create_webhook_router(state.webhook.clone()))
        .layer(TraceLayer::new_for_http())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// Route handlers

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "LINE Agent Bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}
