//! arXiv metadata resolution.
//!
//! One GET against the public Atom query API, parsed with `quick-xml`.
//! Element names are matched on their local part so the feed's namespace
//! prefixes (`atom:`, `arxiv:`) never matter.

use crate::config::ArxivEndpoints;
use crate::error::Arxiv2MdError;
use crate::identifier::has_version;
use crate::pipeline::postprocess::normalize_whitespace;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Resolved paper metadata. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArxivMetadata {
    pub title: String,
    pub pdf_url: String,
    /// Identifier as reported by the feed's `<id>`, e.g. `2301.12345v2`.
    pub canonical_id: String,
    /// Identifier pinned to a version; equal to `canonical_id` when the
    /// feed already carried one.
    pub versioned_id: String,
    pub authors: Vec<String>,
    pub summary: Option<String>,
}

/// Query the metadata API for `id` and parse the first entry.
pub async fn fetch_metadata(
    http: &reqwest::Client,
    endpoints: &ArxivEndpoints,
    id: &str,
    timeout: Duration,
) -> Result<ArxivMetadata, Arxiv2MdError> {
    info!("Fetching arXiv metadata for {}", id);
    let response = http
        .get(&endpoints.metadata_api)
        .query(&[("id_list", id)])
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Arxiv2MdError::MetadataFetch {
            reason: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Arxiv2MdError::MetadataFetch {
            reason: format!("HTTP {}", status.as_u16()),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| Arxiv2MdError::MetadataFetch {
            reason: e.to_string(),
        })?;
    debug!("Metadata response: {} bytes", body.len());

    parse_atom_entry(&body, id, &endpoints.pdf_base)
}

/// Fields of the first `<entry>` as they appear in the feed.
#[derive(Debug, Default)]
struct RawEntry {
    id: String,
    title: Option<String>,
    summary: Option<String>,
    authors: Vec<String>,
    pdf_href: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Id,
    Title,
    Summary,
    AuthorName,
}

/// Parse an Atom feed into [`ArxivMetadata`].
///
/// `requested_id` fills in the canonical id when the entry's `<id>` is
/// blank; `pdf_base` is the prefix for the deterministic PDF URL.
pub fn parse_atom_entry(
    xml: &str,
    requested_id: &str,
    pdf_base: &str,
) -> Result<ArxivMetadata, Arxiv2MdError> {
    let entry = read_first_entry(xml)?.ok_or_else(|| Arxiv2MdError::PaperNotFound {
        id: requested_id.to_string(),
    })?;

    // arXiv answers unknown ids with an entry describing the error.
    if entry.id.contains("/api/errors") {
        return Err(Arxiv2MdError::PaperNotFound {
            id: requested_id.to_string(),
        });
    }

    let title = entry
        .title
        .as_deref()
        .map(normalize_whitespace)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Arxiv2MdError::MissingTitle {
            id: requested_id.to_string(),
        })?;
    if title == "Error" {
        return Err(Arxiv2MdError::PaperNotFound {
            id: requested_id.to_string(),
        });
    }

    let canonical_id = canonical_id_from(&entry.id).unwrap_or_else(|| requested_id.to_string());
    let versioned_id = if has_version(&canonical_id) {
        canonical_id.clone()
    } else {
        entry
            .pdf_href
            .as_deref()
            .and_then(canonical_id_from)
            .filter(|id| has_version(id))
            .unwrap_or_else(|| canonical_id.clone())
    };

    Ok(ArxivMetadata {
        pdf_url: format!("{}/{}.pdf", pdf_base.trim_end_matches('/'), versioned_id),
        title,
        canonical_id,
        versioned_id,
        authors: entry
            .authors
            .iter()
            .map(|a| normalize_whitespace(a))
            .filter(|a| !a.is_empty())
            .collect(),
        summary: entry
            .summary
            .as_deref()
            .map(normalize_whitespace)
            .filter(|s| !s.is_empty()),
    })
}

/// `http://arxiv.org/abs/2301.12345v2` → `2301.12345v2`.
///
/// Legacy ids keep their category: `http://arxiv.org/abs/hep-th/9901001v1`
/// → `hep-th/9901001v1`.
fn canonical_id_from(id_url: &str) -> Option<String> {
    let trimmed = id_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let path = trimmed
        .split_once("/abs/")
        .or_else(|| trimmed.split_once("/pdf/"))
        .map(|(_, rest)| rest)
        .unwrap_or_else(|| trimmed.rsplit('/').next().unwrap_or(trimmed));
    let path = path.strip_suffix(".pdf").unwrap_or(path);
    (!path.is_empty()).then(|| path.to_string())
}

fn read_first_entry(xml: &str) -> Result<Option<RawEntry>, Arxiv2MdError> {
    let mut reader = Reader::from_str(xml);
    let mut saw_root = false;
    let mut in_entry = false;
    let mut entry = RawEntry::default();
    let mut target: Option<TextTarget> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Arxiv2MdError::MetadataParse(e.to_string()))?;
        match event {
            Event::Start(e) => {
                saw_root = true;
                match e.local_name().as_ref() {
                    b"entry" => in_entry = true,
                    b"id" if in_entry => target = Some(TextTarget::Id),
                    b"title" if in_entry => target = Some(TextTarget::Title),
                    b"summary" if in_entry => target = Some(TextTarget::Summary),
                    b"name" if in_entry => target = Some(TextTarget::AuthorName),
                    b"link" if in_entry => read_pdf_link(&e, &mut entry),
                    _ => {}
                }
                text.clear();
            }
            Event::Empty(e) => {
                saw_root = true;
                if in_entry && e.local_name().as_ref() == b"link" {
                    read_pdf_link(&e, &mut entry);
                }
            }
            Event::Text(t) if target.is_some() => {
                let chunk = t
                    .unescape()
                    .map_err(|e| Arxiv2MdError::MetadataParse(e.to_string()))?;
                text.push_str(&chunk);
            }
            Event::CData(c) if target.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"entry" && in_entry {
                    return Ok(Some(entry));
                }
                if let Some(t) = target.take() {
                    let value = std::mem::take(&mut text);
                    match t {
                        TextTarget::Id => entry.id = value,
                        TextTarget::Title => entry.title = Some(value),
                        TextTarget::Summary => entry.summary = Some(value),
                        TextTarget::AuthorName => entry.authors.push(value),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Arxiv2MdError::MetadataParse(
            "response contains no XML elements".into(),
        ));
    }
    Ok(None)
}

fn read_pdf_link(e: &BytesStart<'_>, entry: &mut RawEntry) {
    if entry.pdf_href.is_some() {
        return;
    }
    let mut href = None;
    let mut is_pdf = false;
    for attr in e.attributes().flatten() {
        let value = match attr.unescape_value() {
            Ok(v) => v.into_owned(),
            Err(_) => continue,
        };
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value),
            b"title" if value.eq_ignore_ascii_case("pdf") => is_pdf = true,
            b"type" if value.eq_ignore_ascii_case("application/pdf") => is_pdf = true,
            _ => {}
        }
    }
    if is_pdf {
        entry.pdf_href = href;
    }
}
