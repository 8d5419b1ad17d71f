//! Health probe endpoints.
//!
//! `/healthz` answers as long as the process serves HTTP. `/readyz` turns
//! green once the MachineRequest watcher has started.

use crate::error::ControllerError;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Probe response body.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProbeResponse {
    /// "ok" or "starting"
    pub status: String,
    pub version: String,
}

impl ProbeResponse {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

pub fn routes(ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(ready)
}

async fn healthz() -> impl IntoResponse {
    ProbeResponse::new("ok")
}

async fn readyz(State(ready): State<Arc<AtomicBool>>) -> impl IntoResponse {
    if ready.load(Ordering::Acquire) {
        (StatusCode::OK, ProbeResponse::new("ok"))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, ProbeResponse::new("starting"))
    }
}

/// Serve the probes on `addr` until the process exits.
pub async fn serve(addr: SocketAddr, ready: Arc<AtomicBool>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving health probes on {}", addr);
    axum::serve(listener, routes(ready)).await?;
    Ok(())
}
