//! Native binary protocol for minimal overhead
//!
//! Request format (fixed 28-byte header + variable names):
//! - cmd: u8 (1 allow, 2 update, 3 info)
//! - flags: u8 (bit 0: max-wait override present, bit 1: blocking mode;
//!   meaningful for allow only)
//! - namespace_len: u8
//! - bucket_len: u8
//! - f1: i64 LE (allow: tokens_requested; update: size)
//! - f2: i64 LE (allow: max_wait_millis_override; update: fill_rate)
//! - f3: i64 LE (update: wait_timeout_millis)
//! - namespace: [u8; namespace_len]
//! - bucket: [u8; bucket_len]
//!
//! Response format (fixed 26 bytes):
//! - status: u8 (0 OK, then the rejection codes in Status order)
//! - reserved: u8
//! - f1: i64 LE (allow: tokens_granted; info: size)
//! - f2: i64 LE (allow: wait_millis; info: fill_rate)
//! - f3: i64 LE (info: wait_timeout_millis)

use anyhow::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::Transport;
use crate::metrics::TransportKind;
use crate::service::QuotaService;
use crate::types::{AllowRequest, InfoRequest, Status, UpdateRequest};

pub(crate) const HEADER_LEN: usize = 28;
pub(crate) const RESPONSE_LEN: usize = 26;

pub(crate) const CMD_ALLOW: u8 = 1;
pub(crate) const CMD_UPDATE: u8 = 2;
pub(crate) const CMD_INFO: u8 = 3;

pub(crate) const FLAG_MAX_WAIT: u8 = 0b01;
pub(crate) const FLAG_BLOCK: u8 = 0b10;

pub(crate) struct RequestHeader {
    pub cmd: u8,
    pub flags: u8,
    pub namespace_len: usize,
    pub bucket_len: usize,
    pub f1: i64,
    pub f2: i64,
    pub f3: i64,
}

pub(crate) fn parse_header(buf: &[u8; HEADER_LEN]) -> RequestHeader {
    RequestHeader {
        cmd: buf[0],
        flags: buf[1],
        namespace_len: buf[2] as usize,
        bucket_len: buf[3] as usize,
        f1: i64::from_le_bytes(buf[4..12].try_into().unwrap()),
        f2: i64::from_le_bytes(buf[12..20].try_into().unwrap()),
        f3: i64::from_le_bytes(buf[20..28].try_into().unwrap()),
    }
}

pub(crate) fn encode_response(status: Status, f1: i64, f2: i64, f3: i64) -> [u8; RESPONSE_LEN] {
    let mut buf = [0u8; RESPONSE_LEN];
    buf[0] = status.code();
    buf[2..10].copy_from_slice(&f1.to_le_bytes());
    buf[10..18].copy_from_slice(&f2.to_le_bytes());
    buf[18..26].copy_from_slice(&f3.to_le_bytes());
    buf
}

pub struct NativeTransport {
    host: String,
    port: u16,
}

impl NativeTransport {
    pub fn new(host: &str, port: u16) -> Self {
        NativeTransport {
            host: host.to_string(),
            port,
        }
    }

    async fn handle_connection(mut socket: TcpStream, service: QuotaService) -> Result<()> {
        // Lower latency for small request/response frames.
        socket.set_nodelay(true)?;

        let mut header = [0u8; HEADER_LEN];
        let mut names = BytesMut::with_capacity(512);

        loop {
            match socket.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) => {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        break; // client disconnected
                    }
                    return Err(e.into());
                }
            }

            let req = parse_header(&header);
            if !matches!(req.cmd, CMD_ALLOW | CMD_UPDATE | CMD_INFO) {
                tracing::warn!("Unknown command: {}", req.cmd);
                break;
            }

            names.clear();
            names.resize(req.namespace_len + req.bucket_len, 0);
            socket.read_exact(&mut names).await?;

            let (namespace, bucket) = match (
                std::str::from_utf8(&names[..req.namespace_len]),
                std::str::from_utf8(&names[req.namespace_len..]),
            ) {
                (Ok(ns), Ok(b)) => (ns.to_string(), b.to_string()),
                _ => {
                    tracing::error!("Invalid UTF-8 in namespace or bucket name");
                    break;
                }
            };

            let response = match req.cmd {
                CMD_ALLOW => {
                    let allow = AllowRequest {
                        namespace,
                        bucket,
                        tokens_requested: req.f1,
                        max_wait_millis_override: (req.flags & FLAG_MAX_WAIT != 0)
                            .then_some(req.f2),
                        block: req.flags & FLAG_BLOCK != 0,
                    };
                    let resp = service.allow(TransportKind::Native, allow).await;
                    encode_response(resp.status, resp.tokens_granted, resp.wait_millis, 0)
                }
                CMD_UPDATE => {
                    let update = UpdateRequest {
                        namespace,
                        bucket,
                        size: req.f1,
                        fill_rate: req.f2,
                        wait_timeout_millis: req.f3,
                    };
                    let resp = service.update(TransportKind::Native, update);
                    encode_response(resp.status, 0, 0, 0)
                }
                _ => {
                    let info = InfoRequest { namespace, bucket };
                    let resp = service.get_info(TransportKind::Native, info);
                    encode_response(resp.status, resp.size, resp.fill_rate, resp.wait_timeout_millis)
                }
            };

            socket.write_all(&response).await?;
            socket.flush().await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn start(self, service: QuotaService) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;

        tracing::info!("Native protocol transport listening on {}", addr);

        loop {
            let (socket, peer) = listener.accept().await?;
            let service = service.clone();
            tokio::spawn(async move {
                if let Err(e) = NativeTransport::handle_connection(socket, service).await {
                    tracing::error!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}
