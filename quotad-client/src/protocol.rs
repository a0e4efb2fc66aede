//! Wire format of the native protocol
//!
//! Requests are a fixed 28-byte little-endian header followed by the
//! namespace and bucket names; responses are a fixed 26 bytes. The layout
//! mirrors the server's `transport/native.rs`.

use std::time::Duration;

use crate::error::{ClientError, Result};

pub(crate) const HEADER_LEN: usize = 28;
pub(crate) const RESPONSE_LEN: usize = 26;

pub(crate) const CMD_ALLOW: u8 = 1;
pub(crate) const CMD_UPDATE: u8 = 2;
pub(crate) const CMD_INFO: u8 = 3;

pub(crate) const FLAG_MAX_WAIT: u8 = 0b01;
pub(crate) const FLAG_BLOCK: u8 = 0b10;

const MAX_NAME_LEN: usize = 255;

/// Decision statuses as the server reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoBucket,
    TooManyBuckets,
    TooManyTokensRequested,
    Timeout,
    InvalidRequest,
    ServerError,
}

impl Status {
    pub(crate) fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Status::Ok,
            1 => Status::NoBucket,
            2 => Status::TooManyBuckets,
            3 => Status::TooManyTokensRequested,
            4 => Status::Timeout,
            5 => Status::InvalidRequest,
            6 => Status::ServerError,
            other => return Err(ClientError::UnknownStatus(other)),
        })
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Result of an allow call.
#[derive(Debug, Clone, Copy)]
pub struct AllowOutcome {
    pub status: Status,
    pub tokens_granted: i64,
    /// How long to wait before the granted tokens exist. Zero when the
    /// request was rejected or served in blocking mode.
    pub wait: Duration,
}

/// A bucket's configuration triple.
#[derive(Debug, Clone, Copy)]
pub struct BucketInfo {
    pub status: Status,
    pub size: i64,
    pub fill_rate: i64,
    pub wait_timeout_millis: i64,
}

pub(crate) fn encode_request(
    cmd: u8,
    flags: u8,
    namespace: &str,
    bucket: &str,
    f1: i64,
    f2: i64,
    f3: i64,
) -> Result<Vec<u8>> {
    if namespace.len() > MAX_NAME_LEN {
        return Err(ClientError::NameTooLong(namespace.len()));
    }
    if bucket.len() > MAX_NAME_LEN {
        return Err(ClientError::NameTooLong(bucket.len()));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + namespace.len() + bucket.len());
    buf.push(cmd);
    buf.push(flags);
    buf.push(namespace.len() as u8);
    buf.push(bucket.len() as u8);
    buf.extend_from_slice(&f1.to_le_bytes());
    buf.extend_from_slice(&f2.to_le_bytes());
    buf.extend_from_slice(&f3.to_le_bytes());
    buf.extend_from_slice(namespace.as_bytes());
    buf.extend_from_slice(bucket.as_bytes());
    Ok(buf)
}

pub(crate) fn decode_response(buf: &[u8; RESPONSE_LEN]) -> Result<(Status, i64, i64, i64)> {
    let status = Status::from_code(buf[0])?;
    let f1 = i64::from_le_bytes(buf[2..10].try_into().unwrap());
    let f2 = i64::from_le_bytes(buf[10..18].try_into().unwrap());
    let f3 = i64::from_le_bytes(buf[18..26].try_into().unwrap());
    Ok((status, f1, f2, f3))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_layout() {
        let frame =
            encode_request(CMD_ALLOW, FLAG_MAX_WAIT, "api", "search", 3, 250, 0).unwrap();

        assert_eq!(frame.len(), HEADER_LEN + 3 + 6);
        assert_eq!(frame[0], CMD_ALLOW);
        assert_eq!(frame[1], FLAG_MAX_WAIT);
        assert_eq!(frame[2], 3);
        assert_eq!(frame[3], 6);
        assert_eq!(i64::from_le_bytes(frame[4..12].try_into().unwrap()), 3);
        assert_eq!(i64::from_le_bytes(frame[12..20].try_into().unwrap()), 250);
        assert_eq!(&frame[HEADER_LEN..HEADER_LEN + 3], b"api");
        assert_eq!(&frame[HEADER_LEN + 3..], b"search");
    }

    #[test]
    fn oversized_names_are_rejected_before_sending() {
        let long = "x".repeat(300);
        assert!(matches!(
            encode_request(CMD_INFO, 0, &long, "b", 0, 0, 0),
            Err(ClientError::NameTooLong(300))
        ));
    }

    #[test]
    fn response_decodes_status_and_fields() {
        let mut buf = [0u8; RESPONSE_LEN];
        buf[0] = 4; // Timeout
        buf[2..10].copy_from_slice(&7i64.to_le_bytes());
        buf[10..18].copy_from_slice(&1200i64.to_le_bytes());

        let (status, f1, f2, f3) = decode_response(&buf).unwrap();
        assert_eq!(status, Status::Timeout);
        assert_eq!(f1, 7);
        assert_eq!(f2, 1200);
        assert_eq!(f3, 0);

        buf[0] = 9;
        assert!(matches!(
            decode_response(&buf),
            Err(ClientError::UnknownStatus(9))
        ));
    }
}
