//! prompt-anywhere-host: localhost daemon for agent prewarming
//!
//! Optional companion process. The prompt surface probes /health on startup
//! and, when the host is up, asks it to prewarm agent backends so the first
//! turn starts faster. Loopback only.
//! Run with: cargo run --bin prompt-anywhere-host

use axum::{
    http::{header, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::env;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 17123;

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct PrewarmRequest {
    agents: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PrewarmResponse {
    ok: bool,
    requested: Vec<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: "prompt-anywhere-host",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Acknowledge a prewarm request. Warming is advisory: the host records
/// interest so resident backends can spin up; agents that do not support
/// residency simply ignore it.
async fn prewarm(
    Json(req): Json<PrewarmRequest>,
) -> Result<Json<PrewarmResponse>, (StatusCode, String)> {
    if req.agents.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No agents requested".into()));
    }
    info!(agents = ?req.agents, "prewarm requested");
    Ok(Json(PrewarmResponse {
        ok: true,
        requested: req.agents,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = env::var("PROMPT_ANYWHERE_HOST").unwrap_or_else(|_| DEFAULT_HOST.into());
    let port: u16 = env::var("PROMPT_ANYWHERE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    // Loopback CORS so a local web surface can also probe the host
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/agents/prewarm", post(prewarm))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "prompt-anywhere-host listening");

    axum::serve(listener, app).await?;
    Ok(())
}
