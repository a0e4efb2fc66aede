//! Engine error taxonomy
//!
//! All domain errors come back on the result channel; the transport maps
//! them onto wire statuses. Nothing here is ever raised as a panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllowError {
    #[error("no such bucket {namespace}:{bucket}")]
    NoBucket { namespace: String, bucket: String },

    #[error("namespace {namespace} is at its dynamic bucket cap, cannot create {bucket}")]
    TooManyBuckets { namespace: String, bucket: String },

    #[error("{requested} tokens requested, bucket allows at most {max} per request")]
    TooManyTokensRequested { requested: i64, max: i64 },

    #[error("timed out waiting for tokens on {namespace}:{bucket}")]
    Timeout { namespace: String, bucket: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}
