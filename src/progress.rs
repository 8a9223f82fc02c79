//! Progress-callback trait for batch events.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] to
//! [`crate::batch::BatchOrchestrator::with_progress`] to receive events as the
//! batch runs. Every event is raised by the orchestrator task, never from a
//! worker, so callbacks are never invoked concurrently. Implementations must
//! still be `Send + Sync` because the orchestrator may move between runtime
//! threads.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfbatch::{BatchProgressCallback, ProcessingResult};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter {
//!     failed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for FailureCounter {
//!     fn on_document_complete(&self, result: &ProcessingResult) {
//!         if !result.success() {
//!             self.failed.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//! ```

use crate::output::ProcessingResult;
use std::path::Path;
use std::sync::Arc;

/// Batch lifecycle events. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after discovery and before any document is dispatched.
    ///
    /// # Arguments
    /// * `total_documents`: number of discovered input files
    /// * `workers`: number of partitions
    fn on_batch_start(&self, total_documents: usize, workers: usize) {
        let _ = (total_documents, workers);
    }

    /// A worker picked up `path`.
    fn on_document_start(&self, worker: usize, path: &Path) {
        let _ = (worker, path);
    }

    /// A result was recorded, including failed and abandoned ones.
    fn on_document_complete(&self, result: &ProcessingResult) {
        let _ = result;
    }

    /// Called once, after the report is persisted.
    fn on_batch_complete(&self, total: usize, succeeded: usize, failed: usize) {
        let _ = (total, succeeded, failed);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::output::ResultMetadata;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        started: AtomicUsize,
        completed: AtomicUsize,
        total: AtomicUsize,
    }

    impl BatchProgressCallback for Tracking {
        fn on_batch_start(&self, total_documents: usize, _workers: usize) {
            self.total.store(total_documents, Ordering::SeqCst);
        }

        fn on_document_start(&self, _worker: usize, _path: &Path) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _result: &ProcessingResult) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn failed() -> ProcessingResult {
        let path = PathBuf::from("x.pdf");
        ProcessingResult::failed(
            &path,
            &ProcessError::Abandoned {
                reason: "test".into(),
            },
            ResultMetadata::for_file(&path, 0),
        )
    }

    #[test]
    fn noop_callback_accepts_every_event() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(3, 2);
        cb.on_document_start(0, Path::new("a.pdf"));
        cb.on_document_complete(&failed());
        cb.on_batch_complete(3, 2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Tracking::default();
        tracker.on_batch_start(2, 1);
        tracker.on_document_start(0, Path::new("a.pdf"));
        tracker.on_document_complete(&failed());
        tracker.on_document_complete(&failed());
        assert_eq!(tracker.total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.started.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 2);
    }
}
