//! Conversion stages between a fetched document and the final Markdown.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested without the network.
//!
//! ## Data Flow
//!
//! ```text
//! HTML page ──▶ html ──┐
//!                      ├──▶ blocks ──▶ postprocess ──▶ refine ──▶ Markdown
//! .tex file ──▶ latex ─┘   (prefix)     (cleanup)     (llm, optional)
//! ```
//!
//! 1. [`html`] / [`latex`]: format-specific conversion; both pull authors,
//!    references and acknowledgements out of the body
//! 2. [`blocks`]: render the pulled-out parts as fenced compression blocks
//!    placed before the body
//! 3. [`postprocess`]: deterministic whitespace and fence cleanup
//! 4. [`refine`]: optional LLM pass, per section or over the whole body,
//!    through the [`llm`] client

pub mod blocks;
pub mod html;
pub mod latex;
pub mod llm;
pub mod postprocess;
pub mod refine;
