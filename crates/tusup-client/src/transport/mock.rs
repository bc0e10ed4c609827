//! Mock transport for testing

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;
use url::Url;

use super::{PatchRequest, Transport};
use crate::error::TransportError;
use crate::protocol::TransportResponse;

/// A scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    Response(TransportResponse),
    /// Fail without an HTTP response
    Failure(String),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        Self::Response(TransportResponse::new(status))
    }

    pub fn offset(status: u16, offset: u64) -> Self {
        Self::Response(TransportResponse::new(status).with_offset(offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedMethod {
    Patch,
    Head,
}

/// A request as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: RecordedMethod,
    pub url: String,
    /// `Upload-Offset` sent with a PATCH
    pub offset: Option<u64>,
    pub body: Vec<u8>,
}

/// Mock transport with scripted PATCH/HEAD replies
///
/// Once a script runs dry the mock behaves like a well-behaved endpoint:
/// PATCH accepts the whole body (204, offset + body length) and HEAD reports
/// the offset of the last accepted byte.
#[derive(Debug, Default)]
pub struct MockTransport {
    patch_replies: Mutex<VecDeque<MockReply>>,
    head_replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    server_offset: Mutex<u64>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a PATCH reply
    pub fn push_patch(&self, reply: MockReply) -> &Self {
        self.patch_replies.lock().push_back(reply);
        self
    }

    /// Queue a HEAD reply
    pub fn push_head(&self, reply: MockReply) -> &Self {
        self.head_replies.lock().push_back(reply);
        self
    }

    /// Set the offset the default endpoint behaviour starts from
    pub fn set_server_offset(&self, offset: u64) {
        *self.server_offset.lock() = offset;
    }

    /// All requests received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// `Upload-Offset` of every PATCH, in order
    pub fn patch_offsets(&self) -> Vec<u64> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == RecordedMethod::Patch)
            .filter_map(|r| r.offset)
            .collect()
    }

    pub fn head_count(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == RecordedMethod::Head)
            .count()
    }

    fn reply(reply: MockReply) -> Result<TransportResponse, TransportError> {
        match reply {
            MockReply::Response(response) => Ok(response),
            MockReply::Failure(message) => Err(TransportError::Request(message)),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn patch(&self, request: PatchRequest) -> Result<TransportResponse, TransportError> {
        let PatchRequest {
            url,
            offset,
            length,
            body,
            progress,
        } = request;

        // Drain the body the way a real transport would, reporting progress per frame
        let mut buf = Vec::with_capacity(length as usize);
        let mut frames = body;
        while let Some(frame) = frames.try_next().await? {
            buf.extend_from_slice(&frame);
            if let Some(progress) = &progress {
                progress(buf.len() as u64, length);
            }
        }

        let accepted = buf.len() as u64;
        self.requests.lock().push(RecordedRequest {
            method: RecordedMethod::Patch,
            url: url.to_string(),
            offset: Some(offset),
            body: buf,
        });

        let scripted = self.patch_replies.lock().pop_front();
        match scripted {
            Some(reply) => Self::reply(reply),
            None => {
                let mut server_offset = self.server_offset.lock();
                if *server_offset != offset {
                    return Ok(TransportResponse::new(409));
                }
                *server_offset += accepted;
                Ok(TransportResponse::new(204).with_offset(*server_offset))
            }
        }
    }

    async fn head(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        self.requests.lock().push(RecordedRequest {
            method: RecordedMethod::Head,
            url: url.to_string(),
            offset: None,
            body: Vec::new(),
        });

        let scripted = self.head_replies.lock().pop_front();
        match scripted {
            Some(reply) => Self::reply(reply),
            None => Ok(TransportResponse::new(200).with_offset(*self.server_offset.lock())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{stream_range, ByteSource, MemorySource};
    use std::sync::Arc;

    fn patch(offset: u64, data: &'static [u8]) -> PatchRequest {
        let source: Arc<dyn ByteSource> = Arc::new(MemorySource::from(data));
        PatchRequest {
            url: Url::parse("http://mock/files/a").unwrap(),
            offset,
            length: data.len() as u64,
            body: stream_range(source, 0, data.len() as u64, 4),
            progress: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_replies_then_default() {
        let mock = MockTransport::new();
        mock.push_patch(MockReply::status(500));

        let first = mock.patch(patch(0, b"abcdef")).await.unwrap();
        assert_eq!(first.status, 500);

        let second = mock.patch(patch(0, b"abcdef")).await.unwrap();
        assert_eq!(second.status, 204);
        assert_eq!(second.offset(), Some(6));

        let head = mock.head(&Url::parse("http://mock/files/a").unwrap()).await.unwrap();
        assert_eq!(head.offset(), Some(6));

        assert_eq!(mock.patch_offsets(), vec![0, 0]);
        assert_eq!(mock.head_count(), 1);
        assert_eq!(mock.requests()[1].body, b"abcdef".to_vec());
    }

    #[tokio::test]
    async fn test_default_endpoint_detects_stale_offset() {
        let mock = MockTransport::new();
        mock.set_server_offset(3);

        let response = mock.patch(patch(0, b"abc")).await.unwrap();
        assert_eq!(response.status, 409);
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let mock = MockTransport::new();
        mock.push_head(MockReply::Failure("connection reset".into()));

        let err = mock
            .head(&Url::parse("http://mock/files/a").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
