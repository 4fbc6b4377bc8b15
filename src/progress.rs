//! Progress-callback trait for conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! stage changes, extraction-service polling updates and per-section
//! refinement progress.
//!
//! The [`Stage`] messages are the status lines a dialog (or the CLI spinner)
//! shows while a paper is being fetched.
//!
//! # Example
//!
//! ```rust
//! use arxiv2md::{ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_refine_progress(&self, done: usize, total: usize) {
//!         self.done.store(done, Ordering::SeqCst);
//!         eprintln!("{}", arxiv2md::progress::refine_status(done, total));
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::SourceKind;
use std::fmt;
use std::sync::Arc;

/// Coarse pipeline stage, reported as it is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchingMetadata,
    CheckingExistingAsset,
    ReusingExistingAsset,
    DownloadingPdf,
    UploadingPdf,
    ExtractionSubmitting,
    /// Task accepted, waiting in the service's queue.
    ExtractionQueued,
    ExtractionRunning,
    ExtractionDownloading,
    FetchingHtml,
    /// HTML was unavailable; trying the LaTeX source archive.
    LatexFallback,
    Refining { full_input: bool },
    Inserting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::FetchingMetadata => "Fetching arXiv metadata...",
            Stage::CheckingExistingAsset => "Checking for an existing PDF asset...",
            Stage::ReusingExistingAsset => "Reusing existing PDF asset",
            Stage::DownloadingPdf => "Downloading PDF...",
            Stage::UploadingPdf => "Uploading PDF...",
            Stage::ExtractionSubmitting => "Submitting extraction task...",
            Stage::ExtractionQueued => "Extraction task queued...",
            Stage::ExtractionRunning => "Extraction running...",
            Stage::ExtractionDownloading => "Downloading extraction result...",
            Stage::FetchingHtml => "Fetching HTML full text...",
            Stage::LatexFallback => "HTML unavailable, trying LaTeX source...",
            Stage::Refining { full_input: true } => "Refining full document with the LLM...",
            Stage::Refining { full_input: false } => "Refining sections with the LLM...",
            Stage::Inserting => "Inserting note...",
        })
    }
}

/// `"<done> of <total> done"`.
pub fn refine_status(done: usize, total: usize) -> String {
    format!("{done} of {total} done")
}

/// Called by the pipeline as it moves through a conversion.
///
/// Implementations must be `Send + Sync`: section refinements complete on
/// whichever task the runtime polls. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// A new stage started.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// One extraction-service poll.
    ///
    /// # Arguments
    /// * `state`    : raw task state (`pending`, `running`, ...)
    /// * `extracted`: pages done, when the service reports it
    /// * `total`    : total pages, when the service reports it
    fn on_extraction_progress(&self, state: &str, extracted: Option<u64>, total: Option<u64>) {
        let _ = (state, extracted, total);
    }

    /// Section refinement progress. Fired once with `done = 0` before any
    /// call is made, then after every completed call.
    fn on_refine_progress(&self, done: usize, total: usize) {
        let _ = (done, total);
    }

    /// Called once when the Markdown is final.
    fn on_conversion_complete(&self, source: SourceKind, markdown_len: usize) {
        let _ = (source, markdown_len);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
