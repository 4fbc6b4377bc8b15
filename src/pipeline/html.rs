//! arXiv HTML rendering → Markdown.
//!
//! ```text
//! html ─▶ article.ltx_document ─▶ compression blocks ─▶ serialise body ─▶ htmd ─▶ math
//!              (None if absent)    authors/refs/acks     links resolved            substituted
//!                                  marked as removed     math → tokens
//! ```
//!
//! The parsed tree is never mutated. Extracted blocks are recorded as
//! removed and skipped while the article is serialised back to HTML for the
//! generic converter.
//!
//! TeX from `<math alttext>` is swapped for opaque alphanumeric tokens before
//! conversion and substituted afterwards, so the converter can neither escape
//! backslashes and underscores nor reflow display equations.

use crate::config::Labels;
use crate::error::Arxiv2MdError;
use crate::metadata::ArxivMetadata;
use crate::output::MarkdownConversionResult;
use crate::pipeline::blocks::{render_prefix, with_prefix, CompressionBlock};
use crate::pipeline::postprocess::{cleanup_markdown, normalize_whitespace};
use htmd::options::{CodeBlockStyle, HeadingStyle, Options};
use htmd::HtmlToMarkdown;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;
use url::Url;

static SEL_ARTICLE: Lazy<Selector> = Lazy::new(|| Selector::parse("article.ltx_document").unwrap());
static SEL_AUTHORS: Lazy<Selector> = Lazy::new(|| Selector::parse(".ltx_authors").unwrap());
static SEL_SECTION: Lazy<Selector> = Lazy::new(|| Selector::parse("section").unwrap());
static SEL_HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").unwrap());
static SEL_BIBLIOGRAPHY: Lazy<Selector> = Lazy::new(|| Selector::parse(".ltx_bibliography").unwrap());
static SEL_BIBITEM: Lazy<Selector> = Lazy::new(|| Selector::parse("li.ltx_bibitem").unwrap());

const REFERENCE_TITLES: [&str; 2] = ["references", "bibliography"];
const ACKNOWLEDGEMENT_TITLES: [&str; 2] = ["acknowledgements", "acknowledgments"];

/// Elements dropped together with their content.
const DROPPED_TAGS: [&str; 3] = ["script", "style", "noscript"];

const VOID_TAGS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Convert an arXiv HTML page.
///
/// Returns `Ok(None)` when the page has no `article.ltx_document` or the
/// article converts to nothing; the caller falls through to the next format.
pub fn convert_html(
    html: &str,
    metadata: &ArxivMetadata,
    base_url: &str,
    labels: &Labels,
    omit_references: bool,
) -> Result<Option<MarkdownConversionResult>, Arxiv2MdError> {
    let document = Html::parse_document(html);
    let Some(article) = document.select(&SEL_ARTICLE).next() else {
        debug!("No article.ltx_document in HTML for {}", metadata.versioned_id);
        return Ok(None);
    };

    // ── Compression blocks ───────────────────────────────────────────────
    let extracted = extract_compression_blocks(article);

    // ── Serialise what remains ───────────────────────────────────────────
    let base = Url::parse(base_url).ok();
    let mut writer = BodyWriter {
        removed: &extracted.removed,
        base: base.as_ref(),
        html: String::with_capacity(html.len() / 2),
        math: Vec::new(),
    };
    writer.write_children(article);

    // ── Generic conversion ───────────────────────────────────────────────
    let converter = HtmlToMarkdown::builder()
        .options(Options {
            heading_style: HeadingStyle::Atx,
            code_block_style: CodeBlockStyle::Fenced,
            ..Default::default()
        })
        .skip_tags(DROPPED_TAGS.to_vec())
        .build();
    let converted = converter
        .convert(&writer.html)
        .map_err(|e| Arxiv2MdError::Internal(format!("HTML conversion failed: {e}")))?;
    let raw_body = writer.substitute_math(&converted).trim().to_string();
    if raw_body.is_empty() {
        return Ok(None);
    }

    // ── Assemble ─────────────────────────────────────────────────────────
    let authors = extracted
        .authors
        .or_else(|| (!metadata.authors.is_empty()).then(|| metadata.authors.join(", ")));
    let mut blocks = Vec::new();
    if let Some(authors) = authors {
        blocks.push(CompressionBlock::authors(labels, &authors));
    }
    if let Some(references) = extracted.references.filter(|_| !omit_references) {
        blocks.push(CompressionBlock::references(labels, &references));
    }
    if let Some(acknowledgements) = extracted.acknowledgements {
        blocks.push(CompressionBlock::acknowledgements(labels, &acknowledgements));
    }
    let prefix = render_prefix(&blocks);

    Ok(Some(MarkdownConversionResult {
        markdown: with_prefix(&prefix, &cleanup_markdown(&raw_body)),
        llm_source: with_prefix(&prefix, &raw_body),
        llm_full_source: raw_body,
        prefix,
    }))
}

// ── Compression-block extraction ─────────────────────────────────────────────

struct Extracted<'a> {
    authors: Option<String>,
    references: Option<String>,
    acknowledgements: Option<String>,
    removed: Vec<ElementRef<'a>>,
}

fn extract_compression_blocks(article: ElementRef<'_>) -> Extracted<'_> {
    let mut removed = Vec::new();

    let authors = article.select(&SEL_AUTHORS).next().and_then(|el| {
        removed.push(el);
        Some(normalize_whitespace(&element_text(el))).filter(|t| !t.is_empty())
    });

    let references = match find_section(article, &REFERENCE_TITLES, &removed) {
        Some(section) => Some(section),
        // Some renderings put the bibliography outside any titled section.
        None => article
            .select(&SEL_BIBLIOGRAPHY)
            .find(|el| !is_removed(*el, &removed)),
    }
    .map(|el| {
        removed.push(el);
        reference_lines(el)
    })
    .filter(|t| !t.is_empty());

    let acknowledgements = find_section(article, &ACKNOWLEDGEMENT_TITLES, &removed)
        .map(|el| {
            removed.push(el);
            normalize_whitespace(&block_text(el))
        })
        .filter(|t| !t.is_empty());

    Extracted {
        authors,
        references,
        acknowledgements,
        removed,
    }
}

/// First `<section>` whose first heading contains one of `titles`
/// (case-insensitive).
fn find_section<'a>(
    article: ElementRef<'a>,
    titles: &[&str],
    removed: &[ElementRef<'a>],
) -> Option<ElementRef<'a>> {
    article.select(&SEL_SECTION).find(|section| {
        if is_removed(*section, removed) {
            return false;
        }
        section
            .select(&SEL_HEADING)
            .next()
            .map(|h| element_text(h).trim().to_lowercase())
            .is_some_and(|heading| titles.iter().any(|t| heading.contains(t)))
    })
}

/// One line per bibliography item when the markup has them, otherwise the
/// whole section as one normalised line.
fn reference_lines(el: ElementRef<'_>) -> String {
    let items: Vec<String> = el
        .select(&SEL_BIBITEM)
        .map(|li| normalize_whitespace(&element_text(li)))
        .filter(|line| !line.is_empty())
        .collect();
    if items.is_empty() {
        normalize_whitespace(&element_text(el))
    } else {
        items.join("\n")
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join("")
}

/// Text of each child kept apart, so a heading and the paragraph after it
/// do not run together.
fn block_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|child| match child.value() {
            Node::Text(text) => Some((**text).to_string()),
            _ => ElementRef::wrap(child).map(element_text),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_removed(el: ElementRef<'_>, removed: &[ElementRef<'_>]) -> bool {
    let hit = |id| removed.iter().any(|r| r.id() == id);
    hit(el.id()) || el.ancestors().any(|a| hit(a.id()))
}

// ── Serialisation ────────────────────────────────────────────────────────────

struct MathToken {
    tex: String,
    display: bool,
}

struct BodyWriter<'a, 'b> {
    removed: &'b [ElementRef<'a>],
    base: Option<&'b Url>,
    html: String,
    math: Vec<MathToken>,
}

impl<'a, 'b> BodyWriter<'a, 'b> {
    /// Element and text children; comments and other nodes are dropped.
    fn write_children(&mut self, el: ElementRef<'a>) {
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                self.write_element(child_el);
            } else if let Node::Text(text) = child.value() {
                self.html.push_str(&escape_text(text));
            }
        }
    }

    fn write_element(&mut self, el: ElementRef<'a>) {
        if self.removed.iter().any(|r| r.id() == el.id()) {
            return;
        }
        let name = el.value().name();
        if DROPPED_TAGS.contains(&name) {
            return;
        }
        if name == "math" {
            if let Some(tex) = el.value().attr("alttext").map(str::trim).filter(|t| !t.is_empty()) {
                let token = math_token(self.math.len());
                self.math.push(MathToken {
                    tex: tex.to_string(),
                    display: el.value().attr("display") == Some("block"),
                });
                self.html.push_str(&format!("<span>{token}</span>"));
                return;
            }
        }

        self.html.push('<');
        self.html.push_str(name);
        for (attr, value) in el.value().attrs() {
            let value = match (name, attr) {
                ("img", "src") | ("a", "href") => self.resolve(value),
                ("img", "srcset") => self.resolve_srcset(value),
                _ => value.to_string(),
            };
            self.html.push_str(&format!(" {attr}=\"{}\"", escape_attr(&value)));
        }
        self.html.push('>');
        if VOID_TAGS.contains(&name) {
            return;
        }
        self.write_children(el);
        self.html.push_str(&format!("</{name}>"));
    }

    fn resolve(&self, value: &str) -> String {
        if value.is_empty() || value.starts_with('#') {
            return value.to_string();
        }
        match self.base.map(|b| b.join(value)) {
            Some(Ok(url)) => url.to_string(),
            _ => value.to_string(),
        }
    }

    /// Resolve each `url [descriptor]` candidate independently.
    fn resolve_srcset(&self, srcset: &str) -> String {
        srcset
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|candidate| {
                let mut parts = candidate.splitn(2, char::is_whitespace);
                let url = parts.next().unwrap_or_default();
                match parts.next().map(str::trim).filter(|d| !d.is_empty()) {
                    Some(descriptor) => format!("{} {}", self.resolve(url), descriptor),
                    None => self.resolve(url),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn substitute_math(&self, markdown: &str) -> String {
        let mut out = markdown.to_string();
        // Highest index first so `…1END` never matches inside `…11END`.
        for (i, math) in self.math.iter().enumerate().rev() {
            let rendered = if math.display {
                format!("\n\n$$\n{}\n$$\n\n", math.tex)
            } else {
                format!(" ${}$ ", math.tex)
            };
            out = out.replace(&math_token(i), &rendered);
        }
        out
    }
}

fn math_token(index: usize) -> String {
    format!("ARXIVMATH{index}END")
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
