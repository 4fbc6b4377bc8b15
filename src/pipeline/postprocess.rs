//! Post-processing: deterministic text cleanup shared by every converter.
//!
//! Each rule is a pure `&str → String` function so converters can compose
//! exactly the subset they need:
//!
//! - [`cleanup_markdown`] is the display cleanup applied to converted bodies
//!   (strip `\r` and `\t`, collapse 3+ newlines to one blank line, trim).
//! - [`normalize_whitespace`] flattens extracted prose (author lists,
//!   reference entries) to single spaces, including Unicode spaces.
//! - [`strip_markdown_fences`] undoes a model wrapping its whole answer in a
//!   ```` ```markdown ```` fence.

use once_cell::sync::Lazy;
use regex::Regex;

/// Display cleanup for converted Markdown.
///
/// Rules (applied in order):
/// 1. Drop carriage returns and tabs
/// 2. Collapse 3+ consecutive newlines to exactly one blank line
/// 3. Trim the whole document
///
/// Trailing spaces stay: two of them before a newline are a hard break.
pub fn cleanup_markdown(input: &str) -> String {
    let s = strip_control_whitespace(input);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Drop carriage returns and tabs ───────────────────────────────────

fn strip_control_whitespace(input: &str) -> String {
    input.chars().filter(|c| *c != '\r' && *c != '\t').collect()
}

// ── Trailing whitespace (LaTeX output only) ──────────────────────────────────

static RE_TRAILING_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+\n").unwrap());

pub fn trim_trailing_whitespace(input: &str) -> String {
    RE_TRAILING_SPACES.replace_all(input, "\n").into_owned()
}

// ── Rule 2: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

pub fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Prose normalisation ──────────────────────────────────────────────────────

static RE_ANY_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Collapse every run of whitespace (NBSP and the other Unicode spaces
/// included) into one ASCII space and trim.
pub fn normalize_whitespace(input: &str) -> String {
    RE_ANY_WHITESPACE.replace_all(input, " ").trim().to_string()
}

// ── LLM answer cleanup ───────────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*)\n```\s*$").unwrap());

/// Remove a fence wrapping the entire input, keep everything else as-is.
pub fn strip_markdown_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        // A body containing its own fences means the outer pair is not a wrapper.
        Some(caps) if !caps[1].contains("\n```") => caps[1].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Normalise CRLF / CR to LF.
pub fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}
