//! Progress-callback trait for per-cell extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the reconstructor OCRs each detected cell. The CLI uses this to
//! drive its progress bar; a server could forward the same events to a
//! websocket without the library knowing about it.
//!
//! # Example
//!
//! ```rust
//! use table2json::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     cells: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_cell_complete(&self, _index: usize, _total: usize, _chars: usize) {
//!         self.cells.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { cells: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each cell.
///
/// All methods have default no-op implementations.
///
/// # Thread safety
///
/// With `ocr_concurrency > 1`, `on_cell_complete` and `on_cell_error` may be
/// called from several blocking threads at once and out of index order.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after grid detection, before any cell is OCR'd.
    fn on_boxes_detected(&self, total_boxes: usize) {
        let _ = total_boxes;
    }

    /// Called when a cell's OCR call returns (possibly with empty text).
    ///
    /// # Arguments
    /// * `index` — 0-indexed position of the box in reading order
    /// * `total` — number of detected boxes
    /// * `chars` — characters of cleaned cell text
    fn on_cell_complete(&self, index: usize, total: usize, chars: usize) {
        let _ = (index, total, chars);
    }

    /// Called when a cell's OCR call fails; the cell is treated as empty.
    fn on_cell_error(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once the markdown table and raw text are both available.
    fn on_extraction_complete(&self, markdown_lines: usize) {
        let _ = markdown_lines;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        boxes: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        lines: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_boxes_detected(&self, total_boxes: usize) {
            self.boxes.store(total_boxes, Ordering::SeqCst);
        }

        fn on_cell_complete(&self, _index: usize, _total: usize, _chars: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_cell_error(&self, _index: usize, _total: usize, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_extraction_complete(&self, markdown_lines: usize) {
            self.lines.store(markdown_lines, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_boxes_detected(4);
        cb.on_cell_complete(0, 4, 12);
        cb.on_cell_error(1, 4, "tesseract exited with 1");
        cb.on_extraction_complete(2);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_boxes_detected(3);
        tracker.on_cell_complete(0, 3, 5);
        tracker.on_cell_complete(1, 3, 2);
        tracker.on_cell_error(2, 3, "spawn failed");
        tracker.on_extraction_complete(1);

        assert_eq!(tracker.boxes.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.lines.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_boxes_detected(10);
        cb.on_cell_complete(0, 10, 8);
    }
}
