//! HTTP trigger for the worker
//!
//! `GET|POST /tick` runs one tick and reports its counts, `GET /health` is a
//! liveness probe.

use crate::scheduler::{Scheduler, TickError, TickReport};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TickResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<TickReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tick", get(run_tick).post(run_tick))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn start_server(bind_address: &str, state: Arc<AppState>) -> Result<()> {
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind_address))?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Tick trigger listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .await
        .context("Server error")?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn run_tick(State(state): State<Arc<AppState>>) -> Response {
    let started = Instant::now();
    let result = state.scheduler.run_tick().await;
    let execution_time_ms = started.elapsed().as_millis() as u64;

    let (status, body) = match result {
        Ok(report) => (
            StatusCode::OK,
            TickResponse {
                success: true,
                results: Some(report),
                error: None,
                execution_time_ms,
            },
        ),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                error!(error = %e, "Tick failed");
            }
            (
                status,
                TickResponse {
                    success: false,
                    results: None,
                    error: Some(format!("{:#}", e)),
                    execution_time_ms,
                },
            )
        }
    };

    (status, Json(body)).into_response()
}

fn status_for(error: &TickError) -> StatusCode {
    match error {
        TickError::AlreadyRunning => StatusCode::CONFLICT,
        TickError::Infra(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
