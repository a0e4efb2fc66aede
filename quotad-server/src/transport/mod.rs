pub mod http;
pub mod native;

use anyhow::Result;
use async_trait::async_trait;

use crate::service::QuotaService;

#[async_trait]
pub trait Transport {
    async fn start(self, service: QuotaService) -> Result<()>;
}
