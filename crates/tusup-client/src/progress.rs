//! Progress events and per-session progress tracking

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Progress callback
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Upload progress snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Total bytes
    pub size: u64,
    /// Bytes acknowledged (chunked mode) or handed to the network (whole-file mode)
    pub offset: u64,
    /// `floor(100 * offset / size)`; 100 for an empty upload
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(size: u64, offset: u64) -> Self {
        let offset = offset.min(size);
        let percent = if size == 0 {
            100
        } else {
            (u128::from(offset) * 100 / u128::from(size)) as u8
        };
        Self {
            size,
            offset,
            percent,
        }
    }
}

/// Emits [`ProgressEvent`]s for one session, dropping any that would go backwards.
///
/// Shared with the transport in whole-file mode, where reports may arrive
/// from the task driving the request body.
pub(crate) struct ProgressTracker {
    size: u64,
    /// Last emitted offset + 1; 0 until the first event
    last: AtomicU64,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub(crate) fn new(size: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            size,
            last: AtomicU64::new(0),
            callback,
        }
    }

    /// Report `offset` bytes of progress. Returns whether an event was emitted.
    pub(crate) fn report(&self, offset: u64) -> bool {
        let offset = offset.min(self.size);
        let marker = offset + 1;
        let previous = self.last.fetch_max(marker, Ordering::SeqCst);
        if marker <= previous {
            return false;
        }
        if let Some(callback) = &self.callback {
            callback(ProgressEvent::new(self.size, offset));
        }
        true
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("size", &self.size)
            .field("last", &self.last.load(Ordering::SeqCst).checked_sub(1))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_percent_floors() {
        assert_eq!(ProgressEvent::new(1000, 300).percent, 30);
        assert_eq!(ProgressEvent::new(3, 1).percent, 33);
        assert_eq!(ProgressEvent::new(3, 2).percent, 66);
        assert_eq!(ProgressEvent::new(1000, 999).percent, 99);
        assert_eq!(ProgressEvent::new(1000, 1000).percent, 100);
        assert_eq!(ProgressEvent::new(0, 0).percent, 100);
        assert_eq!(ProgressEvent::new(u64::MAX, u64::MAX / 2).percent, 49);
    }

    #[test]
    fn test_tracker_drops_regressions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::new(
            100,
            Some(Arc::new(move |event: ProgressEvent| sink.lock().push(event.offset))),
        );

        assert!(tracker.report(0));
        assert!(tracker.report(40));
        assert!(!tracker.report(40));
        assert!(!tracker.report(20));
        assert!(tracker.report(70));
        assert!(tracker.report(500));

        assert_eq!(*seen.lock(), vec![0, 40, 70, 100]);
    }

    #[test]
    fn test_tracker_without_callback() {
        let tracker = ProgressTracker::new(10, None);
        assert!(tracker.report(5));
        assert!(!tracker.report(5));
    }
}
