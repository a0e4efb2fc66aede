//! Transport-facing service layer
//!
//! One wrapper shared by every transport: boundary validation, the 0→1
//! token normalisation, the optional blocking sleep-off, metrics, and the
//! engine-error to wire-status mapping. The engine never sleeps; the sleep
//! happens here, and a client that disconnects mid-sleep simply drops the
//! future — the debit stands.

use std::sync::Arc;
use std::time::Duration;

use quotad::Engine;

use crate::metrics::{Metrics, TransportKind};
use crate::types::{
    AllowRequest, AllowResponse, InfoRequest, InfoResponse, Status, UpdateRequest, UpdateResponse,
};

#[derive(Clone)]
pub struct QuotaService {
    engine: Arc<Engine>,
    metrics: Arc<Metrics>,
}

impl QuotaService {
    pub fn new(engine: Arc<Engine>, metrics: Arc<Metrics>) -> Self {
        QuotaService { engine, metrics }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn allow(&self, transport: TransportKind, req: AllowRequest) -> AllowResponse {
        self.metrics.record_request(transport);

        if req.namespace.is_empty()
            || req.bucket.is_empty()
            || req.tokens_requested < 0
            || req.max_wait_millis_override.is_some_and(|ms| ms < 0)
        {
            self.metrics.record_outcome(Status::RejectedInvalidRequest);
            return AllowResponse::rejected(Status::RejectedInvalidRequest);
        }

        let tokens = if req.tokens_requested == 0 {
            1
        } else {
            req.tokens_requested
        };
        let max_wait = req
            .max_wait_millis_override
            .map(|ms| Duration::from_millis(ms as u64));

        let response = match self.engine.allow(&req.namespace, &req.bucket, tokens, max_wait) {
            Ok(allowance) => {
                let mut wait_millis = allowance.wait.as_millis() as i64;
                if req.block && allowance.wait > Duration::ZERO {
                    tokio::time::sleep(allowance.wait).await;
                    wait_millis = 0;
                }
                AllowResponse {
                    status: Status::Ok,
                    tokens_granted: allowance.granted,
                    wait_millis,
                }
            }
            Err(err) => {
                let status = Status::from(&err);
                if status == Status::RejectedServerError {
                    tracing::error!(error = %err, "allow failed with server error");
                }
                AllowResponse::rejected(status)
            }
        };

        self.metrics.record_outcome(response.status);
        response
    }

    pub fn get_info(&self, transport: TransportKind, req: InfoRequest) -> InfoResponse {
        self.metrics.record_request(transport);

        if req.namespace.is_empty() || req.bucket.is_empty() {
            self.metrics.record_outcome(Status::RejectedInvalidRequest);
            return InfoResponse::rejected(Status::RejectedInvalidRequest);
        }

        let response = match self.engine.get_info(&req.namespace, &req.bucket) {
            Ok(info) => InfoResponse {
                status: Status::Ok,
                size: info.size,
                fill_rate: info.fill_rate,
                wait_timeout_millis: info.wait_timeout_millis,
            },
            Err(err) => InfoResponse::rejected(Status::from(&err)),
        };

        self.metrics.record_outcome(response.status);
        response
    }

    pub fn update(&self, transport: TransportKind, req: UpdateRequest) -> UpdateResponse {
        self.metrics.record_request(transport);

        if req.namespace.is_empty() || req.bucket.is_empty() {
            self.metrics.record_outcome(Status::RejectedInvalidRequest);
            return UpdateResponse {
                status: Status::RejectedInvalidRequest,
            };
        }

        let status = match self.engine.update(
            &req.namespace,
            &req.bucket,
            req.size,
            req.fill_rate,
            req.wait_timeout_millis,
        ) {
            Ok(()) => Status::Ok,
            Err(err) => {
                let status = Status::from(&err);
                if status == Status::RejectedServerError {
                    tracing::error!(error = %err, "update failed with server error");
                }
                status
            }
        };

        self.metrics.record_outcome(status);
        UpdateResponse { status }
    }
}
