//! Output types returned by the conversion entry points.

use crate::metadata::ArxivMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a format converter hands to the refinement stage.
///
/// The display Markdown and the LLM input diverge: the display form is
/// cleaned, while the LLM sees the raw converted body so cleanup never
/// discards context the model could use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownConversionResult {
    /// Final annotated Markdown (compression blocks + cleaned body).
    pub markdown: String,
    /// Input for section-mode refinement.
    pub llm_source: String,
    /// Body without compression blocks, for full-document refinement.
    pub llm_full_source: String,
    /// Rendered compression blocks; empty when there are none.
    pub prefix: String,
}

impl MarkdownConversionResult {
    /// Same text in every slot, no prefix. Used by the extraction service.
    pub fn plain(markdown: impl Into<String>) -> Self {
        let markdown = markdown.into();
        Self {
            llm_source: markdown.clone(),
            llm_full_source: markdown.clone(),
            markdown,
            prefix: String::new(),
        }
    }
}

/// Which document source produced the Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Html,
    Latex,
    ExtractionService,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Html => "HTML",
            SourceKind::Latex => "LaTeX source",
            SourceKind::ExtractionService => "extraction service",
        })
    }
}

/// Aggregate statistics for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Sections found by the splitter (0 when refinement did not run).
    pub sections_total: usize,
    /// Sections actually sent to the model.
    pub sections_refined: usize,
    pub markdown_len: usize,
    pub metadata_duration_ms: u64,
    pub fetch_duration_ms: u64,
    pub refine_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Complete result of [`crate::convert()`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub markdown: String,
    pub metadata: ArxivMetadata,
    pub source: SourceKind,
    /// `true` when the LLM stage rewrote the Markdown.
    pub refined: bool,
    pub stats: ConversionStats,
}

/// A downloaded paper PDF, ready to be stored.
#[derive(Clone)]
pub struct PdfDownload {
    pub metadata: ArxivMetadata,
    /// File name derived from title and versioned id.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for PdfDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfDownload")
            .field("metadata", &self.metadata)
            .field("file_name", &self.file_name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}
