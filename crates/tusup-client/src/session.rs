//! Per-upload session state

use std::sync::Arc;

use url::Url;

use crate::error::{Result, UploadError};
use crate::progress::{ProgressCallback, ProgressTracker};
use crate::source::ByteSource;

/// State of one `upload` call: where the bytes go, where they come from, and
/// how far the endpoint has confirmed.
///
/// `current_offset` only moves to offsets reported by the endpoint.
pub struct UploadSession {
    url: Url,
    source: Arc<dyn ByteSource>,
    size: u64,
    current_offset: u64,
    chunk_size: Option<u64>,
    progress: Arc<ProgressTracker>,
}

impl UploadSession {
    /// Validate inputs and start a session at `offset`
    pub fn new(
        url: &str,
        source: Arc<dyn ByteSource>,
        offset: u64,
        chunk_size: Option<u64>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(UploadError::invalid_config("upload URL is empty"));
        }
        let url = Url::parse(url)
            .map_err(|e| UploadError::invalid_config(format!("invalid upload URL {:?}: {}", url, e)))?;

        let size = source.len();
        if offset > size {
            return Err(UploadError::invalid_config(format!(
                "upload offset {} is beyond the source size {}",
                offset, size
            )));
        }
        if chunk_size == Some(0) {
            return Err(UploadError::invalid_config("chunk size must be greater than zero"));
        }

        Ok(Self {
            url,
            source,
            size,
            current_offset: offset,
            chunk_size,
            progress: Arc::new(ProgressTracker::new(size, on_progress)),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Total upload size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last offset confirmed by the endpoint
    pub fn current_offset(&self) -> u64 {
        self.current_offset
    }

    pub fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk_size.is_some()
    }

    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.current_offset)
    }

    /// Bytes the next PATCH carries
    pub fn next_length(&self) -> u64 {
        match self.chunk_size {
            Some(chunk) => chunk.min(self.remaining()),
            None => self.remaining(),
        }
    }

    pub(crate) fn set_offset(&mut self, offset: u64) {
        self.current_offset = offset;
    }

    pub(crate) fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("url", &self.url.as_str())
            .field("size", &self.size)
            .field("current_offset", &self.current_offset)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn source(len: usize) -> Arc<dyn ByteSource> {
        Arc::new(MemorySource::from(vec![0u8; len]))
    }

    #[test]
    fn test_next_length() {
        let session = UploadSession::new("http://h/f", source(1000), 900, Some(300), None).unwrap();
        assert_eq!(session.next_length(), 100);

        let session = UploadSession::new("http://h/f", source(1000), 250, None, None).unwrap();
        assert_eq!(session.next_length(), 750);
        assert!(!session.is_chunked());
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(matches!(
            UploadSession::new("", source(10), 0, None, None),
            Err(UploadError::InvalidConfig(_))
        ));
        assert!(matches!(
            UploadSession::new("not a url", source(10), 0, None, None),
            Err(UploadError::InvalidConfig(_))
        ));
        assert!(matches!(
            UploadSession::new("http://h/f", source(10), 11, None, None),
            Err(UploadError::InvalidConfig(_))
        ));
        assert!(matches!(
            UploadSession::new("http://h/f", source(10), 0, Some(0), None),
            Err(UploadError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_offset_at_size_is_valid() {
        let session = UploadSession::new("http://h/f", source(10), 10, Some(4), None).unwrap();
        assert_eq!(session.remaining(), 0);
        assert_eq!(session.next_length(), 0);
    }
}
