//! Progress-callback trait for notes-generation events.
//!
//! Inject an [`Arc<dyn NotesProgressCallback>`] via
//! [`crate::config::NotesConfigBuilder::progress_callback`] to observe the
//! incremental mode as it drafts, analyses figures, and rewrites the draft
//! batch by batch. Single-pass generation only reports start and completion.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfnotes::{NotesConfig, NotesProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct BatchCounter(AtomicUsize);
//!
//! impl NotesProgressCallback for BatchCounter {
//!     fn on_batch_complete(&self, batch: usize, total_batches: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("batch {batch}/{total_batches} merged");
//!     }
//! }
//!
//! let config = NotesConfig::builder()
//!     .progress_callback(Arc::new(BatchCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the notes generator as it works through a request.
///
/// Figure events inside one batch may arrive concurrently from different
/// tasks; implementations must synchronise shared state.
pub trait NotesProgressCallback: Send + Sync {
    /// Called once before the first model call.
    fn on_generation_start(&self, total_figures: usize, total_batches: usize) {
        let _ = (total_figures, total_batches);
    }

    /// Called when the initial draft is available (incremental mode only).
    fn on_draft_ready(&self, draft_len: usize) {
        let _ = draft_len;
    }

    /// Called before the analyses of a batch are started.
    ///
    /// `batch` is 1-indexed.
    fn on_batch_start(&self, batch: usize, total_batches: usize) {
        let _ = (batch, total_batches);
    }

    /// Called as each figure analysis finishes.
    ///
    /// `figure_index` is the 1-based discovery index; `ok` is false when the
    /// sentinel description was used.
    fn on_figure_analyzed(&self, figure_index: usize, ok: bool) {
        let _ = (figure_index, ok);
    }

    /// Called after the draft has been rewritten with a batch's analyses.
    fn on_batch_complete(&self, batch: usize, total_batches: usize) {
        let _ = (batch, total_batches);
    }

    /// Called once with the final notes length.
    fn on_generation_complete(&self, notes_len: usize) {
        let _ = notes_len;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl NotesProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::NotesConfig`].
pub type ProgressCallback = Arc<dyn NotesProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        batches: AtomicUsize,
        figures_ok: AtomicUsize,
        figures_failed: AtomicUsize,
    }

    impl NotesProgressCallback for Tracking {
        fn on_figure_analyzed(&self, _figure_index: usize, ok: bool) {
            if ok {
                self.figures_ok.fetch_add(1, Ordering::SeqCst);
            } else {
                self.figures_failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_batch_complete(&self, _batch: usize, _total: usize) {
            self.batches.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_generation_start(7, 2);
        cb.on_draft_ready(120);
        cb.on_batch_start(1, 2);
        cb.on_figure_analyzed(1, true);
        cb.on_batch_complete(1, 2);
        cb.on_generation_complete(300);
    }

    #[test]
    fn tracking_callback_counts_events() {
        let t = Tracking::default();
        t.on_figure_analyzed(1, true);
        t.on_figure_analyzed(2, false);
        t.on_batch_complete(1, 1);
        assert_eq!(t.figures_ok.load(Ordering::SeqCst), 1);
        assert_eq!(t.figures_failed.load(Ordering::SeqCst), 1);
        assert_eq!(t.batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_generation_start(0, 0);
    }
}
