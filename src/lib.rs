//! # arxiv2md
//!
//! Fetch an arXiv paper and turn its full text into clean Markdown.
//!
//! ## Why this crate?
//!
//! arXiv publishes the same paper in several shapes: an HTML rendering for
//! most recent submissions, the LaTeX source for nearly all of them, and the
//! PDF. None of them is Markdown. This crate picks the best available
//! source, converts it, and moves the parts a reader rarely edits (authors,
//! references, acknowledgements) into fenced compression blocks at the top
//! so the body stays readable and an optional LLM pass never rewrites them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input ("2301.12345", arXiv URL, "arXiv:hep-th/9901001")
//!  │
//!  ├─ 1. Identify  normalise to a canonical arXiv id (no I/O)
//!  ├─ 2. Resolve   Atom metadata: title, authors, versioned id, PDF URL
//!  ├─ 3. Fetch     HTML ──(missing/broken)──▶ LaTeX archive
//!  │               or, exclusively, a remote PDF extraction service
//!  ├─ 4. Convert   HTML/LaTeX → Markdown + compression blocks
//!  ├─ 5. Refine    optional LLM pass, per section (≤ 32 in flight) or whole
//!  └─ 6. Output    Markdown + metadata + per-stage timings
//! ```
//!
//! Network access goes through [`net`]: direct requests where allowed, and
//! in restricted contexts a mirror → direct → forwarding-proxy ladder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arxiv2md::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder().omit_references(true).build()?;
//!     let output = convert("https://arxiv.org/abs/1706.03762", &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("source: {}, {} ms", output.source, output.stats.total_duration_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `arxiv2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! arxiv2md = { version = "0.1", default-features = false }
//! ```
//!
//! ## Engines
//!
//! | Engine | Input | Notes |
//! |--------|-------|-------|
//! | none (default) | HTML, then LaTeX | deterministic |
//! | LLM | HTML, then LaTeX | OpenAI-compatible `chat/completions` |
//! | extraction service | PDF URL | MinerU-compatible task API; never refined |
//!
//! LLM refinement and the extraction service are mutually exclusive; the
//! config builder rejects the combination.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod host;
pub mod identifier;
pub mod metadata;
pub mod net;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod sources;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ArxivEndpoints, ConversionConfig, ConversionConfigBuilder, Engine, ExtractionServiceConfig, FetchPolicy,
    Labels, LlmConfig, ProxyConfig, Settings,
};
pub use convert::{convert, convert_sync, convert_to_file, fetch_pdf, pdf_file_name};
pub use error::Arxiv2MdError;
pub use host::{insert_paper, negotiate, InsertMode, InsertOutcome, KernelHost, NoteHost};
pub use identifier::normalize_arxiv_id;
pub use metadata::ArxivMetadata;
pub use output::{ConversionOutput, ConversionStats, MarkdownConversionResult, PdfDownload, SourceKind};
pub use pipeline::llm::MarkdownRefiner;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
