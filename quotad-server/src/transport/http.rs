//! HTTP/JSON transport
//!
//! A small REST surface over the quota engine:
//!
//! - `POST /allow` — `{"namespace": "api", "bucket": "search",
//!   "tokens_requested": 1, "max_wait_millis_override": 50, "block": false}`
//!   → `{"status": "OK", "tokens_granted": 1, "wait_millis": 0}`
//! - `POST /info` — bucket configuration triple
//! - `POST /update` — submit a bucket change through the config source
//! - `GET /health` — liveness
//! - `GET /metrics` — counter snapshot
//! - `GET /api/configs` — historical config revisions (admin surface)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get, routing::post};
use serde::{Deserialize, Serialize};

use super::Transport;
use crate::metrics::{MetricsSnapshot, TransportKind};
use crate::service::QuotaService;
use crate::types::{
    AllowRequest, AllowResponse, InfoRequest, InfoResponse, UpdateRequest, UpdateResponse,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigsResponse {
    pub configs: Vec<quotad::ServiceConfig>,
}

pub struct HttpTransport {
    addr: SocketAddr,
}

impl HttpTransport {
    pub fn new(host: &str, port: u16) -> Self {
        let addr = format!("{host}:{port}").parse().expect("Invalid address");
        Self { addr }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn start(self, service: QuotaService) -> Result<()> {
        let state = Arc::new(service);

        let app = Router::new()
            .route("/allow", post(handle_allow))
            .route("/info", post(handle_info))
            .route("/update", post(handle_update))
            .route("/health", get(|| async { "OK" }))
            .route("/metrics", get(handle_metrics))
            .route("/api/configs", get(handle_configs))
            .with_state(state);

        tracing::info!("HTTP server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn handle_allow(
    State(service): State<Arc<QuotaService>>,
    Json(req): Json<AllowRequest>,
) -> Json<AllowResponse> {
    Json(service.allow(TransportKind::Http, req).await)
}

async fn handle_info(
    State(service): State<Arc<QuotaService>>,
    Json(req): Json<InfoRequest>,
) -> Json<InfoResponse> {
    Json(service.get_info(TransportKind::Http, req))
}

async fn handle_update(
    State(service): State<Arc<QuotaService>>,
    Json(req): Json<UpdateRequest>,
) -> Json<UpdateResponse> {
    Json(service.update(TransportKind::Http, req))
}

async fn handle_metrics(State(service): State<Arc<QuotaService>>) -> Json<MetricsSnapshot> {
    Json(service.metrics().snapshot())
}

async fn handle_configs(
    State(service): State<Arc<QuotaService>>,
) -> Result<Json<ConfigsResponse>, (StatusCode, Json<HttpErrorResponse>)> {
    match service.engine().historical_configs() {
        Ok(configs) => Ok(Json(ConfigsResponse { configs })),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(HttpErrorResponse {
                error: format!("Error reading configs: {e}"),
            }),
        )),
    }
}
