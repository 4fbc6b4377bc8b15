//! Document source fetchers.
//!
//! Each fetcher turns resolved metadata into a [`MarkdownConversionResult`]:
//!
//! | Source | Module | Fallback role |
//! |--------|--------|---------------|
//! | arXiv HTML rendering | [`html`] | preferred |
//! | LaTeX source archive | [`latex`] | when HTML is missing or unusable |
//! | Remote extraction service | [`extraction`] | exclusive, when selected |
//!
//! HTML and LaTeX return `Ok(None)` when the paper simply has no usable
//! document of that kind, so the orchestrator can tell "not there" from
//! "broken" when it logs the fallback.
//!
//! [`MarkdownConversionResult`]: crate::output::MarkdownConversionResult

pub mod extraction;
pub mod html;
pub mod latex;

use crate::config::ConversionConfig;
use crate::metadata::ArxivMetadata;
use crate::net::NetworkClient;
use crate::progress::{ProgressCallback, Stage};

/// Everything a fetcher needs for one paper.
#[derive(Clone, Copy)]
pub struct SourceContext<'a> {
    pub net: &'a NetworkClient,
    pub config: &'a ConversionConfig,
    pub metadata: &'a ArxivMetadata,
}

impl<'a> SourceContext<'a> {
    pub fn new(net: &'a NetworkClient, config: &'a ConversionConfig, metadata: &'a ArxivMetadata) -> Self {
        Self {
            net,
            config,
            metadata,
        }
    }

    pub(crate) fn progress(&self) -> Option<&'a ProgressCallback> {
        self.config.progress_callback.as_ref()
    }

    pub(crate) fn stage(&self, stage: Stage) {
        if let Some(cb) = self.progress() {
            cb.on_stage(stage);
        }
    }
}
