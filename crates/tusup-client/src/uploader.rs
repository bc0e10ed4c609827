//! Transfer controller: drives an upload to completion

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{Result, UploadError};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::protocol::TransferOutcome;
use crate::resolver::OffsetResolver;
use crate::session::UploadSession;
use crate::source::ByteSource;
use crate::transmitter::Transmitter;
use crate::transport::{HttpTransport, Transport};

/// Success callback
pub type SuccessCallback = Arc<dyn Fn() + Send + Sync>;
/// Error callback
pub type ErrorCallback = Arc<dyn Fn(&UploadError) + Send + Sync>;

/// Options for one `upload` call
///
/// Every field is optional: unset fields keep the value the [`Uploader`]
/// remembers from earlier calls.
#[derive(Clone, Default)]
pub struct UploadRequest {
    pub url: Option<String>,
    pub source: Option<Arc<dyn ByteSource>>,
    pub upload_offset: Option<u64>,
    pub chunk_size: Option<u64>,
    pub on_progress: Option<ProgressCallback>,
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl UploadRequest {
    /// Upload `source` to an existing upload URL
    pub fn new(url: impl Into<String>, source: impl ByteSource + 'static) -> Self {
        Self {
            url: Some(url.into()),
            source: Some(Arc::new(source)),
            ..Default::default()
        }
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn source(mut self, source: Arc<dyn ByteSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Resume from a known offset
    pub fn offset(mut self, offset: u64) -> Self {
        self.upload_offset = Some(offset);
        self
    }

    /// Send bounded slices of `bytes` per request
    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn on_progress(mut self, f: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&UploadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Overlay `other` onto `self`; set fields in `other` win.
    ///
    /// Switching to a different URL without an explicit offset restarts at 0.
    fn merge(&mut self, other: UploadRequest) {
        if let Some(url) = other.url {
            if self.url.as_deref() != Some(url.as_str()) && other.upload_offset.is_none() {
                self.upload_offset = None;
            }
            self.url = Some(url);
        }
        if other.source.is_some() {
            self.source = other.source;
        }
        if other.upload_offset.is_some() {
            self.upload_offset = other.upload_offset;
        }
        if other.chunk_size.is_some() {
            self.chunk_size = other.chunk_size;
        }
        if other.on_progress.is_some() {
            self.on_progress = other.on_progress;
        }
        if other.on_success.is_some() {
            self.on_success = other.on_success;
        }
        if other.on_error.is_some() {
            self.on_error = other.on_error;
        }
    }
}

impl std::fmt::Debug for UploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadRequest")
            .field("url", &self.url)
            .field("size", &self.source.as_ref().map(|s| s.len()))
            .field("upload_offset", &self.upload_offset)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Summary of a finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub url: String,
    pub size: u64,
    pub start_offset: u64,
    pub final_offset: u64,
    /// PATCH requests sent
    pub requests: u32,
    /// Conflicts recovered from
    pub conflicts: u32,
}

/// Resumable upload engine
///
/// Options persist across calls on the same instance, including the last
/// offset the endpoint confirmed, so calling [`Uploader::upload`] again after
/// a failure resumes where the endpoint left off.
pub struct Uploader {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    options: UploadRequest,
}

impl Uploader {
    /// Create an uploader speaking HTTP
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)
            .map_err(|e| UploadError::invalid_config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create an uploader over any transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config,
            options: UploadRequest::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Offset the next call starts from unless overridden
    pub fn current_offset(&self) -> Option<u64> {
        self.options.upload_offset
    }

    /// Forget options remembered from earlier calls
    pub fn reset(&mut self) {
        self.options = UploadRequest::default();
    }

    /// Query the endpoint for its current offset of `url`
    pub async fn resolve_offset(&self, url: &str) -> Result<u64> {
        let url = url::Url::parse(url)
            .map_err(|e| UploadError::invalid_config(format!("invalid upload URL {:?}: {}", url, e)))?;
        self.resolver().resolve_offset(&url).await
    }

    /// Upload until the endpoint confirms the whole source.
    ///
    /// Conflicts are resolved and retried; any other failure stops the upload.
    /// Exactly one of `on_success` / `on_error` fires before this returns.
    #[instrument(skip(self, request))]
    pub async fn upload(&mut self, request: UploadRequest) -> Result<UploadReport> {
        self.options.merge(request);
        let options = self.options.clone();

        let result = match self.open_session(&options) {
            Ok(mut session) => {
                let result = self.drive(&mut session).await;
                self.options.upload_offset = Some(session.current_offset());
                result
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                info!(
                    "Upload of {} bytes to {} complete ({} requests, {} conflicts)",
                    report.size, report.url, report.requests, report.conflicts
                );
                if let Some(on_success) = &options.on_success {
                    on_success();
                }
            }
            Err(e) => {
                warn!("Upload failed: {}", e);
                if let Some(on_error) = &options.on_error {
                    on_error(e);
                }
            }
        }

        result
    }

    fn open_session(&self, options: &UploadRequest) -> Result<UploadSession> {
        let url = options
            .url
            .as_deref()
            .ok_or_else(|| UploadError::invalid_config("no upload URL given"))?;
        let source = options
            .source
            .clone()
            .ok_or_else(|| UploadError::invalid_config("no byte source given"))?;

        UploadSession::new(
            url,
            source,
            options.upload_offset.unwrap_or(0),
            options.chunk_size.or(self.config.chunk_size),
            options.on_progress.clone(),
        )
    }

    fn resolver(&self) -> OffsetResolver {
        OffsetResolver::new(Arc::clone(&self.transport), self.config.retry.clone())
    }

    async fn drive(&self, session: &mut UploadSession) -> Result<UploadReport> {
        let transmitter = Transmitter::new(Arc::clone(&self.transport));
        let resolver = self.resolver();
        let retry = &self.config.retry;

        let mut report = UploadReport {
            url: session.url().to_string(),
            size: session.size(),
            start_offset: session.current_offset(),
            final_offset: session.current_offset(),
            requests: 0,
            conflicts: 0,
        };

        info!(
            "Uploading {} bytes to {} from offset {} ({})",
            session.size(),
            session.url(),
            session.current_offset(),
            match session.chunk_size() {
                Some(chunk) => format!("chunks of {} bytes", chunk),
                None => "whole file".to_string(),
            }
        );

        if session.size() == 0 {
            debug!("Empty source, nothing to send");
            return Ok(report);
        }

        // Consecutive retries without forward progress
        let mut retries = 0u32;

        loop {
            let attempted = session.current_offset();
            report.requests += 1;

            match transmitter.send(session).await {
                TransferOutcome::Complete => {
                    session.set_offset(session.size());
                    report.final_offset = session.size();
                    return Ok(report);
                }
                TransferOutcome::Partial { new_offset } if new_offset > attempted => {
                    debug!("Endpoint accepted up to {}", new_offset);
                    retries = 0;
                    session.set_offset(new_offset);
                    report.final_offset = new_offset;
                    if session.is_chunked() {
                        session.progress().report(new_offset);
                    }
                }
                TransferOutcome::Partial { new_offset } if new_offset == attempted => {
                    warn!("Endpoint accepted no bytes at offset {}", attempted);
                    retries += 1;
                    self.back_off(retries, retry.max_conflicts, "upload").await?;
                }
                TransferOutcome::Partial { .. } | TransferOutcome::Conflict => {
                    warn!("Offset conflict at {}, resynchronising", attempted);
                    report.conflicts += 1;
                    retries += 1;
                    self.back_off(retries, retry.max_conflicts, "conflict recovery")
                        .await?;

                    let offset = resolver.resolve_offset(session.url()).await?;
                    if offset > session.size() {
                        return Err(UploadError::Transport {
                            status: Some(200),
                            message: format!(
                                "Server reports offset {} beyond upload size {} for {}",
                                offset,
                                session.size(),
                                session.url()
                            ),
                            url: session.url().to_string(),
                            offset: attempted,
                        });
                    }
                    session.set_offset(offset);
                    report.final_offset = offset;
                    if offset == session.size() {
                        // Bytes from an earlier attempt already completed the upload
                        return Ok(report);
                    }
                }
                TransferOutcome::TransportError {
                    status,
                    message,
                    context,
                } => {
                    return Err(UploadError::Transport {
                        status,
                        message,
                        url: context.url,
                        offset: context.attempted_offset,
                    });
                }
            }
        }
    }

    /// Wait before retry number `retry` (1-based), or give up past `max`
    async fn back_off(&self, retry: u32, max: u32, operation: &str) -> Result<()> {
        if retry > max {
            return Err(UploadError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: retry,
            });
        }
        let delay = self.config.retry.delay_for_retry(retry - 1);
        if !delay.is_zero() {
            debug!("Backing off {:?} before retry {}", delay, retry);
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::transport::{MockReply, MockTransport};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Callback counters for one upload
    #[derive(Clone, Default)]
    struct Calls {
        progress: Arc<Mutex<Vec<ProgressEvent>>>,
        success: Arc<Mutex<u32>>,
        errors: Arc<Mutex<Vec<UploadError>>>,
    }

    impl Calls {
        fn attach(&self, request: UploadRequest) -> UploadRequest {
            let progress = Arc::clone(&self.progress);
            let success = Arc::clone(&self.success);
            let errors = Arc::clone(&self.errors);
            request
                .on_progress(move |e| progress.lock().push(e))
                .on_success(move || *success.lock() += 1)
                .on_error(move |e| errors.lock().push(e.clone()))
        }

        fn percents(&self) -> Vec<u8> {
            self.progress.lock().iter().map(|e| e.percent).collect()
        }

        fn successes(&self) -> u32 {
            *self.success.lock()
        }

        fn errors(&self) -> Vec<UploadError> {
            self.errors.lock().clone()
        }
    }

    fn fast_config() -> ClientConfig {
        ClientConfig::builder()
            .backoff_ms(1, 4)
            .max_conflicts(4)
            .max_resolve_attempts(4)
            .build()
    }

    fn uploader(mock: &Arc<MockTransport>) -> Uploader {
        Uploader::with_transport(fast_config(), mock.clone())
    }

    fn data(len: usize) -> MemorySource {
        MemorySource::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    const URL: &str = "http://mock/files/video";

    #[tokio::test]
    async fn test_whole_file_single_patch() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::offset(204, 1000));
        let calls = Calls::default();

        let report = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(1000))))
            .await
            .unwrap();

        assert_eq!(calls.successes(), 1);
        assert!(calls.errors().is_empty());
        assert_eq!(mock.patch_offsets(), vec![0]);
        assert_eq!(report.final_offset, 1000);
        assert_eq!(report.requests, 1);
        assert_eq!(calls.progress.lock().last().map(|e| e.percent), Some(100));
    }

    #[tokio::test]
    async fn test_chunked_sequence() {
        let mock = Arc::new(MockTransport::new());
        for offset in [300, 600, 900, 1000] {
            mock.push_patch(MockReply::offset(204, offset));
        }
        let calls = Calls::default();

        uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(1000)).chunk_size(300)))
            .await
            .unwrap();

        assert_eq!(mock.patch_offsets(), vec![0, 300, 600, 900]);
        let lens: Vec<usize> = mock.requests().iter().map(|r| r.body.len()).collect();
        assert_eq!(lens, vec![300, 300, 300, 100]);
        assert_eq!(calls.percents(), vec![30, 60, 90]);
        assert_eq!(calls.successes(), 1);
        assert!(calls.errors().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_resumes_from_resolved_offset() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::offset(204, 300))
            .push_patch(MockReply::status(409))
            .push_patch(MockReply::offset(204, 750))
            .push_patch(MockReply::offset(204, 1000));
        mock.push_head(MockReply::offset(200, 450));
        let calls = Calls::default();

        let report = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(1000)).chunk_size(300)))
            .await
            .unwrap();

        assert_eq!(mock.patch_offsets(), vec![0, 300, 450, 750]);
        assert_eq!(mock.head_count(), 1);
        // The resent slice starts exactly at the resolved offset
        let requests = mock.requests();
        let resent = requests
            .iter()
            .find(|r| r.offset == Some(450))
            .unwrap();
        assert_eq!(resent.body[0], (450 % 251) as u8);
        assert_eq!(report.conflicts, 1);
        assert_eq!(calls.successes(), 1);
    }

    #[tokio::test]
    async fn test_repeated_conflicts_resync_each_time() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::status(409))
            .push_patch(MockReply::status(409))
            .push_patch(MockReply::offset(204, 100));
        mock.push_head(MockReply::offset(200, 20))
            .push_head(MockReply::offset(200, 60));
        let calls = Calls::default();

        uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(100))))
            .await
            .unwrap();

        assert_eq!(mock.patch_offsets(), vec![0, 20, 60]);
        assert_eq!(mock.requests()[4].body.len(), 40);
        assert_eq!(calls.successes(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_reported_once() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::status(500));
        let calls = Calls::default();

        let err = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(1000))))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        let errors = calls.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].status(), Some(500));
        assert!(errors[0].to_string().contains("500"));
        assert_eq!(calls.successes(), 0);
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_source_completes_without_requests() {
        let mock = Arc::new(MockTransport::new());
        let calls = Calls::default();

        let report = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, MemorySource::default()).chunk_size(300)))
            .await
            .unwrap();

        assert!(mock.requests().is_empty());
        assert_eq!(report.requests, 0);
        assert_eq!(calls.successes(), 1);
        assert!(calls.errors().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_reports_error() {
        let mock = Arc::new(MockTransport::new());
        let calls = Calls::default();

        let err = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(10)).offset(11)))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::InvalidConfig(_)));
        assert_eq!(calls.errors().len(), 1);
        assert!(mock.requests().is_empty());

        let err = Uploader::with_transport(fast_config(), mock.clone())
            .upload(UploadRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_conflict_budget_exhausted() {
        let mock = Arc::new(MockTransport::new());
        for _ in 0..10 {
            mock.push_patch(MockReply::status(409));
            mock.push_head(MockReply::offset(200, 0));
        }
        let calls = Calls::default();

        let err = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(10))))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            UploadError::RetriesExhausted {
                operation: "conflict recovery".into(),
                attempts: 5
            }
        );
        assert_eq!(mock.patch_offsets().len(), 5);
        assert_eq!(calls.errors().len(), 1);
        assert_eq!(calls.successes(), 0);
    }

    #[tokio::test]
    async fn test_stalled_endpoint_gives_up() {
        let mock = Arc::new(MockTransport::new());
        for _ in 0..10 {
            mock.push_patch(MockReply::offset(204, 0));
        }

        let err = uploader(&mock)
            .upload(UploadRequest::new(URL, data(10)))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::RetriesExhausted { .. }));
        assert_eq!(mock.head_count(), 0);
    }

    #[tokio::test]
    async fn test_regressed_partial_is_resynced() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::offset(204, 50))
            .push_patch(MockReply::offset(204, 10))
            .push_patch(MockReply::offset(204, 100));
        mock.push_head(MockReply::offset(200, 50));

        let report = uploader(&mock)
            .upload(UploadRequest::new(URL, data(100)).chunk_size(50))
            .await
            .unwrap();

        assert_eq!(mock.patch_offsets(), vec![0, 50, 50]);
        assert_eq!(report.conflicts, 1);
    }

    #[tokio::test]
    async fn test_resync_to_size_completes() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::status(409));
        mock.push_head(MockReply::offset(200, 10));
        let calls = Calls::default();

        let report = uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(10))))
            .await
            .unwrap();

        assert_eq!(report.final_offset, 10);
        assert_eq!(mock.patch_offsets(), vec![0]);
        assert_eq!(calls.successes(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_error_resumes_last_offset() {
        let mock = Arc::new(MockTransport::new());
        mock.push_patch(MockReply::offset(204, 300))
            .push_patch(MockReply::status(502))
            .push_patch(MockReply::offset(204, 600))
            .push_patch(MockReply::offset(204, 900))
            .push_patch(MockReply::offset(204, 1000));

        let mut uploader = uploader(&mock);
        let err = uploader
            .upload(UploadRequest::new(URL, data(1000)).chunk_size(300))
            .await
            .unwrap_err();
        assert_eq!(err.offset(), Some(300));
        assert_eq!(uploader.current_offset(), Some(300));

        // Same instance, nothing overridden: resume from the confirmed offset
        let report = uploader.upload(UploadRequest::default()).await.unwrap();
        assert_eq!(report.start_offset, 300);
        assert_eq!(mock.patch_offsets(), vec![0, 300, 300, 600, 900]);
    }

    #[tokio::test]
    async fn test_new_url_restarts_at_zero() {
        let mock = Arc::new(MockTransport::new());
        let mut uploader = uploader(&mock);

        uploader
            .upload(UploadRequest::new(URL, data(10)))
            .await
            .unwrap();
        assert_eq!(uploader.current_offset(), Some(10));

        mock.set_server_offset(0);
        let report = uploader
            .upload(UploadRequest::default().url("http://mock/files/other"))
            .await
            .unwrap();
        assert_eq!(report.start_offset, 0);
        assert_eq!(report.url, "http://mock/files/other");
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_across_partial_whole_file() {
        let mock = Arc::new(MockTransport::new());
        // Endpoint only keeps part of the first body
        mock.push_patch(MockReply::offset(204, 400))
            .push_patch(MockReply::offset(204, 1000));
        let calls = Calls::default();

        uploader(&mock)
            .upload(calls.attach(UploadRequest::new(URL, data(1000))))
            .await
            .unwrap();

        assert_eq!(mock.patch_offsets(), vec![0, 400]);
        let offsets: Vec<u64> = calls.progress.lock().iter().map(|e| e.offset).collect();
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        for event in calls.progress.lock().iter() {
            assert_eq!(event.percent as u64, event.offset * 100 / event.size);
        }
    }

    #[tokio::test]
    async fn test_any_start_offset_reaches_size() {
        for start in [0u64, 1, 299, 300, 999, 1000] {
            let mock = Arc::new(MockTransport::new());
            mock.set_server_offset(start);
            let calls = Calls::default();

            let report = uploader(&mock)
                .upload(calls.attach(UploadRequest::new(URL, data(1000)).offset(start).chunk_size(300)))
                .await
                .unwrap();

            let offsets = mock.patch_offsets();
            assert!(offsets.windows(2).all(|w| w[0] < w[1]), "start {}", start);
            assert_eq!(offsets.first().copied(), Some(start));
            assert_eq!(report.final_offset, 1000);
            assert_eq!(calls.successes(), 1);
        }
    }
}
