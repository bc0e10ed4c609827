//! Offset resolution after a conflict

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::RetryConfig;
use crate::error::{Result, UploadError};
use crate::transport::Transport;

/// Asks the endpoint (HEAD) how many bytes it has durably accepted.
///
/// Any non-200 answer, missing header, or transport failure is retried with
/// exponential backoff until `max_resolve_attempts` is reached.
pub struct OffsetResolver {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
}

impl OffsetResolver {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Self { transport, retry }
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve_offset(&self, url: &Url) -> Result<u64> {
        let attempts = self.retry.max_resolve_attempts.max(1);

        for attempt in 0..attempts {
            let delay = self.retry.delay_for_retry(attempt);
            if !delay.is_zero() {
                debug!("Retrying offset query in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            match self.transport.head(url).await {
                Ok(response) if response.status == 200 => match response.offset() {
                    Some(offset) => {
                        debug!("Endpoint reports offset {}", offset);
                        return Ok(offset);
                    }
                    None => warn!(
                        "HEAD returned 200 without a usable offset ({:?}), attempt {}/{}",
                        response.upload_offset,
                        attempt + 1,
                        attempts
                    ),
                },
                Ok(response) => warn!(
                    "HEAD returned {}, attempt {}/{}",
                    response.status,
                    attempt + 1,
                    attempts
                ),
                Err(e) => warn!("HEAD failed: {}, attempt {}/{}", e, attempt + 1, attempts),
            }
        }

        Err(UploadError::RetriesExhausted {
            operation: "resolve offset".into(),
            attempts,
        })
    }
}
