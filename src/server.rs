//! HTTP surface: the webhook endpoint and a health check

use crate::dispatch::dispatch;
use crate::env::Env;
use crate::error::Result;
use crate::groupme::InboundMessage;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(env: Env) -> Router {
    let webhook_path = env.config.webhook_path.clone();
    Router::new()
        .route(&webhook_path, post(webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(env)
}

async fn webhook(State(env): State<Env>, body: Bytes) -> (StatusCode, &'static str) {
    let message: InboundMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Rejected webhook payload: {}", e);
            return (StatusCode::BAD_REQUEST, "Bad Request: Invalid JSON");
        }
    };

    let outcome = dispatch(&env, &message).await;
    info!("Message {} handled: {:?}", message.id, outcome);
    (StatusCode::OK, "Success")
}

async fn health() -> &'static str {
    "ok"
}

/// Bind and serve until the process is stopped
pub async fn serve(env: Env) -> Result<()> {
    let addr = env.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Listening on {} (webhook at {})",
        addr, env.config.webhook_path
    );
    axum::serve(listener, router(env)).await?;
    Ok(())
}
