//! PATCH transmission and outcome classification

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::progress::ProgressTracker;
use crate::protocol::{classify_patch, ErrorContext, TransferOutcome};
use crate::session::UploadSession;
use crate::source::stream_range;
use crate::transport::{ByteProgress, PatchRequest, Transport};

/// Body frame size when streaming from the byte source
pub const FRAME_SIZE: u64 = 256 * 1024;

/// Sends the next slice of a session and reports what the endpoint made of it
pub struct Transmitter {
    transport: Arc<dyn Transport>,
    frame_size: u64,
}

impl Transmitter {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            frame_size: FRAME_SIZE,
        }
    }

    pub fn with_frame_size(mut self, frame_size: u64) -> Self {
        self.frame_size = frame_size.max(1);
        self
    }

    /// Send one PATCH from the session's current offset.
    ///
    /// Whole-file mode sends everything that remains and forwards in-flight
    /// progress; chunked mode sends at most one chunk and reports nothing
    /// until the endpoint answers.
    #[instrument(skip(self, session), fields(url = %session.url(), offset = session.current_offset()))]
    pub async fn send(&self, session: &UploadSession) -> TransferOutcome {
        let offset = session.current_offset();
        let length = session.next_length();
        let context = ErrorContext {
            url: session.url().to_string(),
            attempted_offset: offset,
        };

        let progress = if session.is_chunked() {
            None
        } else {
            Some(in_flight_progress(Arc::clone(session.progress()), offset))
        };

        debug!("Sending {} bytes", length);
        let request = PatchRequest {
            url: session.url().clone(),
            offset,
            length,
            body: stream_range(Arc::clone(session.source()), offset, length, self.frame_size),
            progress,
        };

        match self.transport.patch(request).await {
            Ok(response) => classify_patch(&response, session.size(), context),
            Err(e) => {
                let message = format!(
                    "Upload to {} at offset {} failed: {}",
                    context.url, context.attempted_offset, e
                );
                TransferOutcome::transport_error(None, message, context)
            }
        }
    }
}

/// Map request-relative byte counts onto absolute upload offsets
fn in_flight_progress(tracker: Arc<ProgressTracker>, start: u64) -> ByteProgress {
    Arc::new(move |loaded, _total| {
        tracker.report(start.saturating_add(loaded));
    })
}
