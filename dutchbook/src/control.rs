//! Operator control plane: health, metrics, and drain.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dutchbook_engine::engine::{EngineMetrics, MetricsSnapshot};
use dutchbook_engine::risk::VenueHealth;
use dutchbook_instrument::Venue;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct ControlState {
    pub metrics: Arc<EngineMetrics>,
    pub health: Arc<VenueHealth>,
    pub drain: watch::Sender<bool>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    kalshi_live: bool,
    polymarket_live: bool,
    draining: bool,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/drain", post(drain))
        .with_state(state)
}

async fn healthz(State(state): State<ControlState>) -> (StatusCode, Json<HealthResponse>) {
    let response = HealthResponse {
        kalshi_live: state.health.is_live(Venue::Kalshi),
        polymarket_live: state.health.is_live(Venue::Polymarket),
        draining: *state.drain.borrow(),
    };
    let status = if response.kalshi_live || response.polymarket_live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn metrics(State(state): State<ControlState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn drain(State(state): State<ControlState>) -> StatusCode {
    info!("drain requested via control plane");
    let _ = state.drain.send(true);
    StatusCode::ACCEPTED
}

/// Serve the control plane until the process exits.
pub async fn serve(addr: String, state: ControlState) {
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(%addr, "control plane listening");
            if let Err(err) = axum::serve(listener, router(state)).await {
                tracing::error!(%err, "control plane server exited");
            }
        }
        Err(err) => tracing::error!(%err, %addr, "control plane bind failed"),
    }
}
