//! Resumable Upload Client
//!
//! Uploads large files to a TUS 1.0.0 endpoint (PATCH/HEAD subset) and
//! survives interruptions by resuming from the last offset the endpoint
//! acknowledged.
//!
//! # Example
//!
//! ```rust,no_run
//! use tusup_client::{ClientConfig, FileSource, UploadRequest, Uploader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut uploader = Uploader::new(ClientConfig::default())?;
//!     let source = FileSource::open("video.mp4").await?;
//!
//!     // The upload URL comes from whatever created the upload session
//!     let request = UploadRequest::new("https://uploads.example.com/files/abc123", source)
//!         .chunk_size(8 * 1024 * 1024)
//!         .on_progress(|p| println!("{}% ({}/{})", p.percent, p.offset, p.size));
//!
//!     let report = uploader.upload(request).await?;
//!     println!("done after {} requests", report.requests);
//!     Ok(())
//! }
//! ```
//!
//! # Transmission modes
//!
//! - **Whole-file** (no chunk size): one PATCH carries everything from the
//!   current offset; progress follows the bytes handed to the network.
//! - **Chunked**: one bounded slice per PATCH; progress follows the offsets
//!   the endpoint acknowledges.
//!
//! Progress offsets never go backwards within a session.
//!
//! # Testing
//!
//! The `testing` module provides an in-process TUS endpoint:
//!
//! ```rust,ignore
//! use tusup_client::testing::{Fault, TestServer};
//!
//! let server = TestServer::start().await?;
//! let url = server.create_upload("video", 1000);
//! server.inject(Fault::Conflict);
//! let report = server.uploader()?.upload(UploadRequest::new(url, source)).await?;
//! ```

pub mod config;
mod error;
pub mod progress;
pub mod protocol;
mod resolver;
mod session;
pub mod source;
pub mod testing;
mod transmitter;
pub mod transport;
mod uploader;

pub use config::{ClientConfig, ConfigError, RetryConfig, TimeoutsConfig};
pub use error::{Result, TransportError, UploadError};
pub use progress::{ProgressCallback, ProgressEvent};
pub use protocol::{TransferOutcome, TransportResponse};
pub use resolver::OffsetResolver;
pub use session::UploadSession;
pub use source::{ByteSource, FileSource, MemorySource};
pub use transmitter::Transmitter;
pub use uploader::{ErrorCallback, SuccessCallback, UploadReport, UploadRequest, Uploader};
