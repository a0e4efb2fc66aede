//! # quotad-client
//!
//! Async client for the quotad native binary protocol.
//!
//! ```no_run
//! use quotad_client::QuotadClient;
//!
//! # async fn example() -> Result<(), quotad_client::ClientError> {
//! let mut client = QuotadClient::connect("127.0.0.1:8072").await?;
//!
//! let outcome = client.allow("api", "search", 1).await?;
//! if outcome.status.is_ok() {
//!     tokio::time::sleep(outcome.wait).await;
//!     // ... proceed with the work the tokens cover
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;

pub use client::QuotadClient;
pub use error::{ClientError, Result};
pub use protocol::{AllowOutcome, BucketInfo, Status};
