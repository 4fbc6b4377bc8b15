//! LLM refinement engine.
//!
//! Two modes:
//!
//! - **Section mode** (default): split on headings, skip protected sections,
//!   refine the rest concurrently with at most `concurrency` calls in flight.
//!   Results are written back by index, so output order always equals input
//!   order no matter which call finishes first.
//! - **Full-document mode**: one call over the body without compression
//!   blocks; the blocks are re-attached verbatim afterwards.
//!
//! Both modes fail fast: the first refinement error aborts the whole stage
//! and drops every call still in flight.

use crate::config::Labels;
use crate::error::Arxiv2MdError;
use crate::output::MarkdownConversionResult;
use crate::pipeline::blocks::with_prefix;
use crate::pipeline::llm::MarkdownRefiner;
use crate::pipeline::postprocess::normalise_line_endings;
use crate::progress::{ProgressCallback, Stage};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info};

/// Heading names that are never sent to the model, besides the configured
/// compression-block headings.
const PROTECTED_HEADINGS: [&str; 7] = [
    "authors",
    "author",
    "references",
    "reference",
    "bibliography",
    "acknowledgements",
    "acknowledgments",
];

static RE_HEADING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+").unwrap());
static RE_LEADING_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+([^\n]+)").unwrap());

/// One refinement unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub content: String,
    /// Passed through unchanged.
    pub skip: bool,
}

/// Knobs for one refinement run.
#[derive(Debug, Clone)]
pub struct RefineOptions {
    pub full_input: bool,
    pub concurrency: usize,
    pub section_timeout: Duration,
    pub full_input_timeout: Duration,
}

/// Refined Markdown plus counters for [`crate::output::ConversionStats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineReport {
    pub markdown: String,
    pub sections_total: usize,
    pub sections_refined: usize,
}

/// Refine a conversion result with `refiner`.
pub async fn refine_markdown(
    result: &MarkdownConversionResult,
    refiner: &dyn MarkdownRefiner,
    options: &RefineOptions,
    labels: &Labels,
    progress: Option<&ProgressCallback>,
) -> Result<RefineReport, Arxiv2MdError> {
    if let Some(cb) = progress {
        cb.on_stage(Stage::Refining {
            full_input: options.full_input,
        });
    }
    if options.full_input {
        refine_full(result, refiner, options.full_input_timeout).await
    } else {
        let source = first_non_blank(&[&result.llm_source, &result.markdown]);
        refine_sections(source, refiner, options, labels, progress).await
    }
}

// ── Full-document mode ───────────────────────────────────────────────────────

async fn refine_full(
    result: &MarkdownConversionResult,
    refiner: &dyn MarkdownRefiner,
    timeout: Duration,
) -> Result<RefineReport, Arxiv2MdError> {
    let source = first_non_blank(&[&result.llm_full_source, &result.llm_source, &result.markdown]);
    if source.is_empty() {
        return Ok(RefineReport {
            markdown: String::new(),
            sections_total: 0,
            sections_refined: 0,
        });
    }

    info!("Refining full document ({} chars) in one call", source.len());
    let refined = refiner.refine(source, timeout).await?;
    Ok(RefineReport {
        markdown: with_prefix(result.prefix.trim(), refined.trim()),
        sections_total: 1,
        sections_refined: 1,
    })
}

// ── Section mode ─────────────────────────────────────────────────────────────

async fn refine_sections(
    source: &str,
    refiner: &dyn MarkdownRefiner,
    options: &RefineOptions,
    labels: &Labels,
    progress: Option<&ProgressCallback>,
) -> Result<RefineReport, Arxiv2MdError> {
    let sections = split_sections(source, labels);
    let pending: Vec<usize> = sections
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.skip)
        .map(|(i, _)| i)
        .collect();
    let total = pending.len();
    if total == 0 {
        debug!("No refinable sections among {}", sections.len());
        return Ok(RefineReport {
            markdown: source.trim().to_string(),
            sections_total: sections.len(),
            sections_refined: 0,
        });
    }

    let workers = options.concurrency.clamp(1, total);
    info!(
        "Refining {} of {} sections with {} concurrent calls",
        total,
        sections.len(),
        workers
    );

    let mut results: Vec<Option<String>> = vec![None; sections.len()];
    if let Some(cb) = progress {
        cb.on_refine_progress(0, total);
    }

    let timeout = options.section_timeout;
    let sections_ref = &sections;
    let mut in_flight = stream::iter(pending)
        .map(|index| async move {
            let refined = refiner.refine(&sections_ref[index].content, timeout).await;
            (index, refined)
        })
        .buffer_unordered(workers);

    let mut done = 0;
    while let Some((index, refined)) = in_flight.next().await {
        // Dropping the stream on error cancels every call still in flight.
        let refined = refined?;
        results[index] = Some(refined.trim().to_string());
        done += 1;
        debug!("Section {} refined ({}/{})", index, done, total);
        if let Some(cb) = progress {
            cb.on_refine_progress(done, total);
        }
    }
    drop(in_flight);

    let markdown = sections
        .iter()
        .zip(results)
        .map(|(section, refined)| refined.unwrap_or_else(|| section.content.clone()))
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string();

    Ok(RefineReport {
        markdown,
        sections_total: sections.len(),
        sections_refined: total,
    })
}

/// Split Markdown at heading lines.
///
/// A heading starts a new section only when the current one already has
/// lines, so text before the first heading forms its own section. Lines
/// inside fenced code blocks never count as headings.
pub fn split_sections(markdown: &str, labels: &Labels) -> Vec<Section> {
    let normalized = normalise_line_endings(markdown);
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return Vec::new();
    }

    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_fence = false;

    let mut push = |lines: &mut Vec<&str>| {
        let content = lines.join("\n").trim().to_string();
        lines.clear();
        if !content.is_empty() {
            let skip = should_skip(&content, labels);
            sections.push(Section { content, skip });
        }
    };

    for line in normalized.split('\n') {
        if !in_fence && RE_HEADING_LINE.is_match(line) && !current.is_empty() {
            push(&mut current);
        }
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        current.push(line);
    }
    push(&mut current);

    sections
}

/// `true` for whole fenced blocks and protected headings.
pub fn should_skip(content: &str, labels: &Labels) -> bool {
    let content = content.trim();
    if content.is_empty() {
        return true;
    }
    if content.starts_with("```") && content.ends_with("```") {
        return true;
    }

    let Some(caps) = RE_LEADING_HEADING.captures(content) else {
        return false;
    };
    let heading = caps[1].trim().to_lowercase();
    let configured = [
        &labels.heading_authors,
        &labels.heading_references,
        &labels.heading_acknowledgements,
    ];
    configured
        .iter()
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .chain(PROTECTED_HEADINGS.iter().map(|h| h.to_string()))
        .any(|protected| heading == protected || heading.contains(&protected))
}

fn first_non_blank<'a>(candidates: &[&'a String]) -> &'a str {
    candidates
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}
