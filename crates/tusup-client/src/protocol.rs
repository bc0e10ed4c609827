//! TUS 1.0.0 wire subset: header names and PATCH response classification

use serde::Serialize;

/// Protocol version header
pub const TUS_RESUMABLE: &str = "Tus-Resumable";
/// The only protocol version spoken
pub const TUS_VERSION: &str = "1.0.0";
/// Offset header, sent on PATCH and reported back on PATCH/HEAD responses
pub const UPLOAD_OFFSET: &str = "Upload-Offset";
/// Content type required for PATCH bodies
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Transport-level view of a PATCH or HEAD response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Raw `Upload-Offset` header value, if present
    pub upload_offset: Option<String>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            upload_offset: None,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.upload_offset = Some(offset.to_string());
        self
    }

    pub fn with_raw_offset(mut self, value: impl Into<String>) -> Self {
        self.upload_offset = Some(value.into());
        self
    }

    /// Parsed `Upload-Offset` header
    pub fn offset(&self) -> Option<u64> {
        self.upload_offset
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn is_patch_success(&self) -> bool {
        self.status == 200 || self.status == 204
    }

    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}

/// Where a failed request was aimed, reported alongside transport errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub url: String,
    pub attempted_offset: u64,
}

/// Result of a single PATCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Endpoint applied bytes up to `new_offset`, short of the total size
    Partial { new_offset: u64 },
    /// Endpoint reports the whole source applied
    Complete,
    /// Client offset is stale; resynchronise before sending again
    Conflict,
    /// Anything else. Not retried by the engine.
    TransportError {
        status: Option<u16>,
        message: String,
        context: ErrorContext,
    },
}

impl TransferOutcome {
    pub fn transport_error(
        status: Option<u16>,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::TransportError {
            status,
            message: message.into(),
            context,
        }
    }
}

/// Classify a PATCH response against the total upload size.
///
/// The offset reported by the endpoint is authoritative, never the number of
/// bytes the client sent.
pub fn classify_patch(response: &TransportResponse, size: u64, context: ErrorContext) -> TransferOutcome {
    if response.is_conflict() {
        return TransferOutcome::Conflict;
    }

    if !response.is_patch_success() {
        let message = format!(
            "Server returned {} status code while uploading to {} at offset {}. You may want to try again.",
            response.status, context.url, context.attempted_offset
        );
        return TransferOutcome::transport_error(Some(response.status), message, context);
    }

    match response.offset() {
        Some(offset) if offset == size => TransferOutcome::Complete,
        Some(offset) if offset < size => TransferOutcome::Partial { new_offset: offset },
        Some(offset) => {
            let message = format!(
                "Server returned {} with {} {} beyond upload size {} for {}",
                response.status, UPLOAD_OFFSET, offset, size, context.url
            );
            TransferOutcome::transport_error(Some(response.status), message, context)
        }
        None => {
            let message = match &response.upload_offset {
                Some(raw) => format!(
                    "Server returned {} with unparseable {} header {:?} for {} at offset {}",
                    response.status, UPLOAD_OFFSET, raw, context.url, context.attempted_offset
                ),
                None => format!(
                    "Server returned {} without {} header for {} at offset {}",
                    response.status, UPLOAD_OFFSET, context.url, context.attempted_offset
                ),
            };
            TransferOutcome::transport_error(Some(response.status), message, context)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(offset: u64) -> ErrorContext {
        ErrorContext {
            url: "http://localhost/files/v1".into(),
            attempted_offset: offset,
        }
    }

    #[test]
    fn test_success_at_size_is_complete() {
        let response = TransportResponse::new(204).with_offset(1000);
        assert_eq!(classify_patch(&response, 1000, ctx(0)), TransferOutcome::Complete);

        let response = TransportResponse::new(200).with_offset(1000);
        assert_eq!(classify_patch(&response, 1000, ctx(0)), TransferOutcome::Complete);
    }

    #[test]
    fn test_success_below_size_is_partial() {
        let response = TransportResponse::new(204).with_offset(300);
        assert_eq!(
            classify_patch(&response, 1000, ctx(0)),
            TransferOutcome::Partial { new_offset: 300 }
        );
    }

    #[test]
    fn test_conflict() {
        let response = TransportResponse::new(409);
        assert_eq!(classify_patch(&response, 1000, ctx(300)), TransferOutcome::Conflict);
    }

    #[test]
    fn test_unexpected_status_carries_context() {
        let response = TransportResponse::new(500);
        match classify_patch(&response, 1000, ctx(600)) {
            TransferOutcome::TransportError {
                status,
                message,
                context,
            } => {
                assert_eq!(status, Some(500));
                assert!(message.contains("500"));
                assert!(message.contains("http://localhost/files/v1"));
                assert!(message.contains("600"));
                assert_eq!(context.attempted_offset, 600);
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_bad_offset_header() {
        let missing = TransportResponse::new(204);
        assert!(matches!(
            classify_patch(&missing, 10, ctx(0)),
            TransferOutcome::TransportError { status: Some(204), .. }
        ));

        let garbage = TransportResponse::new(204).with_raw_offset("abc");
        match classify_patch(&garbage, 10, ctx(0)) {
            TransferOutcome::TransportError { message, .. } => assert!(message.contains("abc")),
            other => panic!("expected transport error, got {:?}", other),
        }

        let beyond = TransportResponse::new(204).with_offset(11);
        assert!(matches!(
            classify_patch(&beyond, 10, ctx(0)),
            TransferOutcome::TransportError { .. }
        ));
    }

    #[test]
    fn test_offset_header_whitespace() {
        let response = TransportResponse::new(200).with_raw_offset(" 450 ");
        assert_eq!(response.offset(), Some(450));
    }
}
