//! Transport layer for the upload engine
//!
//! The engine talks to the endpoint only through [`Transport`]:
//! - [`HttpTransport`] speaks HTTP via `reqwest`
//! - [`MockTransport`] replays scripted responses for testing
//!
//! # Example
//!
//! ```ignore
//! use tusup_client::transport::{HttpTransport, Transport};
//!
//! let transport = HttpTransport::new(&ClientConfig::default())?;
//! let response = transport.head(&url).await?;
//! ```

mod http;
pub mod mock;

pub use http::HttpTransport;
pub use mock::{MockReply, MockTransport, RecordedMethod, RecordedRequest};

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::protocol::TransportResponse;
use crate::source::BodyStream;

/// In-flight byte progress: `(bytes_loaded, bytes_total)` of the current request body
pub type ByteProgress = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A single PATCH to append bytes at `offset`
pub struct PatchRequest {
    pub url: Url,
    pub offset: u64,
    /// Exact body length in bytes
    pub length: u64,
    pub body: BodyStream,
    /// Called as the body is handed to the network, when set
    pub progress: Option<ByteProgress>,
}

impl std::fmt::Debug for PatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchRequest")
            .field("url", &self.url.as_str())
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Request/response primitives the engine needs from the network
///
/// Every call is an independent request; implementations must not share
/// per-request state between calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a PATCH with the TUS headers and return the status and `Upload-Offset`
    async fn patch(&self, request: PatchRequest) -> Result<TransportResponse, TransportError>;

    /// Send a bodiless HEAD and return the status and `Upload-Offset`
    async fn head(&self, url: &Url) -> Result<TransportResponse, TransportError>;
}
