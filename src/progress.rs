//! Progress-callback trait for batch, document and image events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline works through documents.
//!
//! The trait is `Send + Sync` because documents of a batch are processed
//! concurrently and image events are raised from blocking worker threads.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf_extract::{ExtractionConfig, ExtractionProgressCallback, ImageLocator};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Rejections(AtomicUsize);
//!
//! impl ExtractionProgressCallback for Rejections {
//!     fn on_image_resolved(&self, locator: &ImageLocator, accepted: bool) {
//!         if !accepted {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!             eprintln!("rejected {locator}");
//!         }
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Rejections(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::extraction::locator::ImageLocator;
use crate::extraction::report::{DocumentReport, RunSummary};
use std::sync::Arc;

/// Called by the pipeline as it processes documents.
///
/// All methods default to no-ops so implementors override only what they
/// need. Methods may be called concurrently from different threads.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once before any document of a batch starts.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a worker picks up a document.
    fn on_document_start(&self, source: &str) {
        let _ = source;
    }

    /// Called when an image reaches its terminal state.
    fn on_image_resolved(&self, locator: &ImageLocator, accepted: bool) {
        let _ = (locator, accepted);
    }

    /// Called after each page of text is restructured (or falls back to raw text).
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — total pages in the document
    /// * `ok`          — false when the page fell back to raw text
    fn on_page_restructured(&self, page_num: usize, total_pages: usize, ok: bool) {
        let _ = (page_num, total_pages, ok);
    }

    /// Called when a document finished, with its report.
    fn on_document_complete(&self, source: &str, report: &DocumentReport) {
        let _ = (source, report);
    }

    /// Called when a document could not be processed at all.
    fn on_document_failed(&self, source: &str, error: &str) {
        let _ = (source, error);
    }

    /// Called once after every document of a batch has a report.
    fn on_batch_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
