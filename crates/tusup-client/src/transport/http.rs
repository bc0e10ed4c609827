//! reqwest-backed transport

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, Response};
use tokio::time::Instant;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use super::{PatchRequest, Transport};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::protocol::{TransportResponse, OFFSET_OCTET_STREAM, TUS_RESUMABLE, TUS_VERSION, UPLOAD_OFFSET};

/// HTTP transport
///
/// Holds a connection pool only; each call builds its own request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    upload_timeout: Duration,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing client (and its default headers)
    pub fn with_client(client: Client, config: &ClientConfig) -> Self {
        Self {
            client,
            upload_timeout: config.upload_timeout(),
            request_timeout: config.request_timeout(),
        }
    }

    fn into_response(response: Response) -> TransportResponse {
        let upload_offset = response
            .headers()
            .get(UPLOAD_OFFSET)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        TransportResponse {
            status: response.status().as_u16(),
            upload_offset,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(url = %request.url, offset = request.offset, length = request.length))]
    async fn patch(&self, request: PatchRequest) -> Result<TransportResponse, TransportError> {
        let PatchRequest {
            url,
            offset,
            length,
            body,
            progress,
        } = request;

        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let activity = Arc::clone(&last_activity);

        let mut loaded = 0u64;
        let body = body.inspect_ok(move |frame| {
            *activity.lock() = Instant::now();
            loaded += frame.len() as u64;
            trace!("Sent {}/{} bytes", loaded, length);
            if let Some(progress) = &progress {
                progress(loaded, length);
            }
        });

        // Idle limit only, the body has no total deadline
        let send = self
            .client
            .patch(url)
            .header(TUS_RESUMABLE, TUS_VERSION)
            .header(CONTENT_TYPE, OFFSET_OCTET_STREAM)
            .header(UPLOAD_OFFSET, offset)
            .header(CONTENT_LENGTH, length)
            .body(Body::wrap_stream(body))
            .send();

        let response = tokio::select! {
            response = send => response?,
            idle = idle_for(&last_activity, self.upload_timeout) => {
                warn!("PATCH made no progress for {:?}, aborting", idle);
                return Err(TransportError::Stalled(idle));
            }
        };

        let response = Self::into_response(response);
        debug!(
            "PATCH answered {} with offset {:?}",
            response.status, response.upload_offset
        );
        Ok(response)
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn head(&self, url: &Url) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .head(url.clone())
            .timeout(self.request_timeout)
            .header(TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await?;

        let response = Self::into_response(response);
        debug!(
            "HEAD answered {} with offset {:?}",
            response.status, response.upload_offset
        );
        Ok(response)
    }
}

/// Resolves once `last_activity` is older than `limit`
async fn idle_for(last_activity: &Mutex<Instant>, limit: Duration) -> Duration {
    loop {
        let deadline = *last_activity.lock() + limit;
        tokio::time::sleep_until(deadline).await;

        let idle = last_activity.lock().elapsed();
        if idle >= limit {
            return idle;
        }
    }
}
