use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;
use crate::protocol::{
    AllowOutcome, BucketInfo, CMD_ALLOW, CMD_INFO, CMD_UPDATE, FLAG_BLOCK, FLAG_MAX_WAIT,
    RESPONSE_LEN, Status, decode_response, encode_request,
};

/// Client for the quotad native binary protocol. One connection, requests
/// issued sequentially; clone-free and cheap enough to open per task.
pub struct QuotadClient {
    stream: TcpStream,
}

impl QuotadClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(QuotadClient { stream })
    }

    /// Ask for `tokens` tokens under the bucket's configured wait ceiling.
    /// The caller owes a sleep of `wait` before using the grant.
    pub async fn allow(
        &mut self,
        namespace: &str,
        bucket: &str,
        tokens: i64,
    ) -> Result<AllowOutcome> {
        self.allow_request(namespace, bucket, tokens, None, false)
            .await
    }

    /// Ask for tokens with a per-request wait ceiling.
    pub async fn allow_with_wait(
        &mut self,
        namespace: &str,
        bucket: &str,
        tokens: i64,
        max_wait: Duration,
    ) -> Result<AllowOutcome> {
        self.allow_request(namespace, bucket, tokens, Some(max_wait), false)
            .await
    }

    /// Blocking mode: the server sleeps off the wait and responds once the
    /// tokens exist.
    pub async fn allow_blocking(
        &mut self,
        namespace: &str,
        bucket: &str,
        tokens: i64,
    ) -> Result<AllowOutcome> {
        self.allow_request(namespace, bucket, tokens, None, true)
            .await
    }

    async fn allow_request(
        &mut self,
        namespace: &str,
        bucket: &str,
        tokens: i64,
        max_wait: Option<Duration>,
        block: bool,
    ) -> Result<AllowOutcome> {
        let mut flags = 0;
        if max_wait.is_some() {
            flags |= FLAG_MAX_WAIT;
        }
        if block {
            flags |= FLAG_BLOCK;
        }
        let max_wait_millis = max_wait.map(|d| d.as_millis() as i64).unwrap_or(0);

        let frame = encode_request(
            CMD_ALLOW,
            flags,
            namespace,
            bucket,
            tokens,
            max_wait_millis,
            0,
        )?;
        let (status, granted, wait_millis, _) = self.roundtrip(&frame).await?;

        Ok(AllowOutcome {
            status,
            tokens_granted: granted,
            wait: Duration::from_millis(wait_millis.max(0) as u64),
        })
    }

    /// Submit a bucket config change. Applied only once the server commits
    /// the new configuration revision.
    pub async fn update(
        &mut self,
        namespace: &str,
        bucket: &str,
        size: i64,
        fill_rate: i64,
        wait_timeout_millis: i64,
    ) -> Result<Status> {
        let frame = encode_request(
            CMD_UPDATE,
            0,
            namespace,
            bucket,
            size,
            fill_rate,
            wait_timeout_millis,
        )?;
        let (status, _, _, _) = self.roundtrip(&frame).await?;
        Ok(status)
    }

    /// Fetch a bucket's configuration triple.
    pub async fn get_info(&mut self, namespace: &str, bucket: &str) -> Result<BucketInfo> {
        let frame = encode_request(CMD_INFO, 0, namespace, bucket, 0, 0, 0)?;
        let (status, size, fill_rate, wait_timeout_millis) = self.roundtrip(&frame).await?;
        Ok(BucketInfo {
            status,
            size,
            fill_rate,
            wait_timeout_millis,
        })
    }

    async fn roundtrip(&mut self, frame: &[u8]) -> Result<(Status, i64, i64, i64)> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;

        let mut response = [0u8; RESPONSE_LEN];
        self.stream.read_exact(&mut response).await?;
        decode_response(&response)
    }
}
