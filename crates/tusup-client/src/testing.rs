//! Test utilities for tusup-client
//!
//! Provides an in-process TUS endpoint for integration tests. It supports
//! the PATCH/HEAD subset the client speaks, keeps every upload in memory, and
//! can be told to misbehave (conflicts, error statuses, partial acceptance).

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::head;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::config::ClientConfig;
use crate::protocol::{OFFSET_OCTET_STREAM, TUS_RESUMABLE, TUS_VERSION, UPLOAD_OFFSET};
use crate::Uploader;

/// Misbehaviour applied to the next PATCH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer 409 without touching the upload
    Conflict,
    /// Answer with this status without touching the upload
    Status(u16),
    /// Store only the first `n` bytes of the body
    AcceptOnly(u64),
}

/// A PATCH as received by the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPatch {
    pub id: String,
    pub offset: Option<u64>,
    pub length: u64,
}

#[derive(Debug, Default)]
struct StoredUpload {
    length: u64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct EndpointState {
    uploads: HashMap<String, StoredUpload>,
    faults: VecDeque<Fault>,
    patches: Vec<ReceivedPatch>,
    heads: usize,
}

type SharedState = Arc<Mutex<EndpointState>>;

/// Router serving `/files/{id}`
fn tus_router(state: SharedState) -> Router {
    Router::new()
        .route("/files/{id}", head(head_upload).patch(patch_upload))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

fn tus_headers(offset: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(offset));
    headers
}

fn has_tus_version(headers: &HeaderMap) -> bool {
    headers
        .get(TUS_RESUMABLE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == TUS_VERSION)
}

async fn head_upload(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !has_tus_version(&headers) {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }

    let mut state = state.lock();
    state.heads += 1;
    match state.uploads.get(&id) {
        Some(upload) => (StatusCode::OK, tus_headers(upload.data.len() as u64)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn patch_upload(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let offset = headers
        .get(UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut state = state.lock();
    state.patches.push(ReceivedPatch {
        id: id.clone(),
        offset,
        length: body.len() as u64,
    });

    if !has_tus_version(&headers) {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());
    if content_type != Some(OFFSET_OCTET_STREAM) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let Some(offset) = offset else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let fault = state.faults.pop_front();
    let Some(upload) = state.uploads.get_mut(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let keep = match fault {
        Some(Fault::Conflict) => return StatusCode::CONFLICT.into_response(),
        Some(Fault::Status(status)) => {
            return StatusCode::from_u16(status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
        Some(Fault::AcceptOnly(n)) => (n as usize).min(body.len()),
        None => body.len(),
    };

    if offset != upload.data.len() as u64 {
        return StatusCode::CONFLICT.into_response();
    }
    if offset + keep as u64 > upload.length {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }

    upload.data.extend_from_slice(&body[..keep]);
    (StatusCode::NO_CONTENT, tus_headers(upload.data.len() as u64)).into_response()
}

/// A test endpoint that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    state: SharedState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Start the endpoint on an ephemeral local port
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let state = SharedState::default();
        let router = tus_router(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Register an upload of `length` bytes and return its URL
    pub fn create_upload(&self, id: &str, length: u64) -> String {
        self.state.lock().uploads.insert(
            id.to_string(),
            StoredUpload {
                length,
                data: Vec::new(),
            },
        );
        format!("{}/files/{}", self.base_url(), id)
    }

    /// Pretend `data` already reached the endpoint for upload `id`
    pub fn preload(&self, id: &str, data: &[u8]) {
        if let Some(upload) = self.state.lock().uploads.get_mut(id) {
            upload.data = data.to_vec();
        }
    }

    /// Queue a fault for the next PATCH
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Bytes stored for upload `id`
    pub fn uploaded(&self, id: &str) -> Vec<u8> {
        self.state
            .lock()
            .uploads
            .get(id)
            .map(|u| u.data.clone())
            .unwrap_or_default()
    }

    pub fn patches(&self) -> Vec<ReceivedPatch> {
        self.state.lock().patches.clone()
    }

    /// `Upload-Offset` of every PATCH, in order
    pub fn patch_offsets(&self) -> Vec<u64> {
        self.patches().iter().filter_map(|p| p.offset).collect()
    }

    pub fn head_count(&self) -> usize {
        self.state.lock().heads
    }

    /// Client configuration with short timeouts and near-zero backoff
    pub fn client_config() -> ClientConfig {
        ClientConfig::builder()
            .upload_timeout_ms(5_000)
            .request_timeout_ms(2_000)
            .connect_timeout_ms(2_000)
            .backoff_ms(1, 10)
            .max_conflicts(4)
            .max_resolve_attempts(4)
            .build()
    }

    /// An uploader talking HTTP to this endpoint
    pub fn uploader(&self) -> crate::Result<Uploader> {
        Uploader::new(Self::client_config())
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
