//! Common wire types
//!
//! Every transport parses its protocol-specific format into these request
//! types and serialises the responses back out. The `Status` enum is the
//! single mapping point between engine errors and wire statuses.

use quotad::AllowError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    RejectedNoBucket,
    RejectedTooManyBuckets,
    RejectedTooManyTokensRequested,
    RejectedTimeout,
    RejectedInvalidRequest,
    RejectedServerError,
}

impl Status {
    /// Single-byte code used by the native protocol.
    pub fn code(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::RejectedNoBucket => 1,
            Status::RejectedTooManyBuckets => 2,
            Status::RejectedTooManyTokensRequested => 3,
            Status::RejectedTimeout => 4,
            Status::RejectedInvalidRequest => 5,
            Status::RejectedServerError => 6,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<&AllowError> for Status {
    fn from(err: &AllowError) -> Self {
        match err {
            AllowError::NoBucket { .. } => Status::RejectedNoBucket,
            AllowError::TooManyBuckets { .. } => Status::RejectedTooManyBuckets,
            AllowError::TooManyTokensRequested { .. } => Status::RejectedTooManyTokensRequested,
            AllowError::Timeout { .. } => Status::RejectedTimeout,
            AllowError::InvalidRequest(_) => Status::RejectedInvalidRequest,
            AllowError::Internal(_) => Status::RejectedServerError,
        }
    }
}

/// Token request as every transport hands it to the service layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRequest {
    pub namespace: String,
    pub bucket: String,
    /// 0 is treated as 1.
    #[serde(default)]
    pub tokens_requested: i64,
    /// Tightens or widens the bucket's wait ceiling for this request; the
    /// bucket's own ceiling still applies as an upper bound.
    #[serde(default)]
    pub max_wait_millis_override: Option<i64>,
    /// Blocking mode: the server sleeps off the wait before responding.
    #[serde(default)]
    pub block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowResponse {
    pub status: Status,
    pub tokens_granted: i64,
    pub wait_millis: i64,
}

impl AllowResponse {
    pub fn rejected(status: Status) -> Self {
        AllowResponse {
            status,
            tokens_granted: 0,
            wait_millis: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    pub namespace: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub status: Status,
    pub size: i64,
    pub fill_rate: i64,
    pub wait_timeout_millis: i64,
}

impl InfoResponse {
    pub fn rejected(status: Status) -> Self {
        InfoResponse {
            status,
            size: 0,
            fill_rate: 0,
            wait_timeout_millis: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub namespace: String,
    pub bucket: String,
    pub size: i64,
    pub fill_rate: i64,
    pub wait_timeout_millis: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub status: Status,
}
