//! Compression blocks: authors, references and acknowledgements lifted out
//! of the body and re-inserted ahead of it as fenced literal text.
//!
//! ````text
//! ## Authors
//!
//! ```text
//! Authors: Alice Smith, Bob Jones
//! ```
//! ````
//!
//! The fence keeps the refinement stage from rewording names and citations;
//! the heading is one of the protected names [`crate::pipeline::refine`]
//! skips.

use crate::config::Labels;

/// One fenced block under a level-2 heading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionBlock {
    pub heading: String,
    pub lines: Vec<String>,
}

impl CompressionBlock {
    pub fn new(heading: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            heading: heading.into(),
            lines,
        }
    }

    /// `"<label>: <authors>"` under the authors heading.
    pub fn authors(labels: &Labels, authors: &str) -> Self {
        Self::new(
            labels.heading_authors.clone(),
            vec![format!("{}: {}", labels.label_authors, authors)],
        )
    }

    /// `"<label>:"` followed by the reference lines.
    pub fn references(labels: &Labels, references: &str) -> Self {
        Self::new(
            labels.heading_references.clone(),
            vec![format!("{}:", labels.label_references), references.to_string()],
        )
    }

    pub fn acknowledgements(labels: &Labels, text: &str) -> Self {
        Self::new(
            labels.heading_acknowledgements.clone(),
            vec![format!("{}:", labels.label_acknowledgements), text.to_string()],
        )
    }

    pub fn render(&self) -> String {
        let heading = self.heading.trim();
        let heading_line = if heading.is_empty() {
            "##".to_string()
        } else {
            format!("## {heading}")
        };
        let mut fenced = Vec::with_capacity(self.lines.len() + 2);
        fenced.push("```text");
        fenced.extend(self.lines.iter().map(String::as_str));
        fenced.push("```");
        format!("{heading_line}\n\n{}", fenced.join("\n"))
    }
}

/// Render blocks separated by a blank line; empty when there are none.
pub fn render_prefix(blocks: &[CompressionBlock]) -> String {
    blocks
        .iter()
        .map(CompressionBlock::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `prefix + "\n\n" + body`, or just the body when the prefix is empty.
pub fn with_prefix(prefix: &str, body: &str) -> String {
    if prefix.is_empty() {
        body.trim().to_string()
    } else {
        format!("{prefix}\n\n{body}").trim().to_string()
    }
}
