//! Free-form input → canonical arXiv identifier.
//!
//! Accepts bare identifiers (`2301.12345`, `2301.12345v2`, `hep-th/9901001`),
//! abstract and PDF URLs with or without a `.pdf` suffix, and `arXiv:` style
//! prefixes. Pure: no I/O, no errors, just `Some(id)` or `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static RE_NEW_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d{4}\.\d{4,5}(v\d+)?$").unwrap());

static RE_LEGACY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-z\-]+(\.[a-z\-]+)?/\d{7}(v\d+)?$").unwrap());

static RE_ARXIV_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)arxiv\.org/(?:abs|pdf)/([^?#]+?)(?:\.pdf)?(?:[?#].*)?$").unwrap()
});

static RE_VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)v\d+$").unwrap());

/// Normalise user input into an arXiv identifier.
///
/// Returns `None` for anything that does not look like an arXiv paper.
///
/// ```
/// use arxiv2md::identifier::normalize_arxiv_id;
///
/// assert_eq!(normalize_arxiv_id("https://arxiv.org/abs/2301.12345v2").as_deref(), Some("2301.12345v2"));
/// assert_eq!(normalize_arxiv_id("https://arxiv.org/pdf/hep-th/9901001.pdf").as_deref(), Some("hep-th/9901001"));
/// assert_eq!(normalize_arxiv_id("not an id"), None);
/// ```
pub fn normalize_arxiv_id(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let candidate = strip_affixes(&last_path_segment(trimmed).unwrap_or_else(|| trimmed.to_string()));
    if is_valid_id(&candidate) {
        return Some(candidate);
    }

    // Legacy ids span two path segments, so the last-segment heuristic
    // above cannot see them in a URL.
    if let Some(caps) = RE_ARXIV_URL.captures(trimmed) {
        let id = strip_affixes(&caps[1]);
        if is_valid_id(&id) {
            return Some(id);
        }
    }

    let raw = strip_affixes(trimmed);
    is_valid_id(&raw).then_some(raw)
}

/// `true` when `id` matches the new-style or legacy identifier grammar.
pub fn is_valid_id(id: &str) -> bool {
    RE_NEW_STYLE.is_match(id) || RE_LEGACY.is_match(id)
}

/// Drop a trailing `vN` version suffix.
pub fn strip_version(id: &str) -> &str {
    match RE_VERSION_SUFFIX.find(id) {
        Some(m) => &id[..m.start()],
        None => id,
    }
}

/// `true` when the identifier already pins a version.
pub fn has_version(id: &str) -> bool {
    RE_VERSION_SUFFIX.is_match(id)
}

fn last_path_segment(input: &str) -> Option<String> {
    let url = Url::parse(input).ok()?;
    let path = url.path().trim_matches('/');
    if path.is_empty() {
        return None;
    }
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.last().copied().unwrap_or_default();
    if !last.is_empty() {
        return Some(last.to_string());
    }
    segments
        .len()
        .checked_sub(2)
        .map(|i| segments[i].to_string())
}

fn strip_affixes(candidate: &str) -> String {
    let mut s = candidate;
    for prefix in ["abs/", "pdf/"] {
        if s.get(..prefix.len()).is_some_and(|p| p.eq_ignore_ascii_case(prefix)) {
            s = &s[prefix.len()..];
        }
    }
    let cut = s.len().saturating_sub(4);
    if s.len() >= 4 && s.get(cut..).is_some_and(|ext| ext.eq_ignore_ascii_case(".pdf")) {
        s = &s[..cut];
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_new_style_ids() {
        assert_eq!(normalize_arxiv_id("2301.12345").as_deref(), Some("2301.12345"));
        assert_eq!(normalize_arxiv_id("  1706.03762v7 ").as_deref(), Some("1706.03762v7"));
        assert_eq!(normalize_arxiv_id("0704.0001").as_deref(), Some("0704.0001"));
    }

    #[test]
    fn abstract_and_pdf_urls() {
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/abs/2301.12345v2").as_deref(),
            Some("2301.12345v2")
        );
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/pdf/2301.12345.pdf").as_deref(),
            Some("2301.12345")
        );
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/abs/2301.12345v2/").as_deref(),
            Some("2301.12345v2")
        );
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/pdf/2301.12345v3?download=1").as_deref(),
            Some("2301.12345v3")
        );
    }

    #[test]
    fn legacy_ids_in_urls() {
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/pdf/hep-th/9901001.pdf").as_deref(),
            Some("hep-th/9901001")
        );
        assert_eq!(
            normalize_arxiv_id("https://arxiv.org/abs/hep-th/9901001v2").as_deref(),
            Some("hep-th/9901001v2")
        );
        assert_eq!(normalize_arxiv_id("hep-th/9901001").as_deref(), Some("hep-th/9901001"));
        assert_eq!(normalize_arxiv_id("math.AG/0309136").as_deref(), Some("math.AG/0309136"));
    }

    #[test]
    fn scheme_less_and_prefixed_inputs() {
        assert_eq!(
            normalize_arxiv_id("arxiv.org/abs/2301.12345").as_deref(),
            Some("2301.12345")
        );
        assert_eq!(normalize_arxiv_id("arXiv:2301.12345").as_deref(), Some("2301.12345"));
        assert_eq!(normalize_arxiv_id("abs/2301.12345").as_deref(), Some("2301.12345"));
        assert_eq!(normalize_arxiv_id("2301.12345.PDF").as_deref(), Some("2301.12345"));
    }

    #[test]
    fn case_is_preserved() {
        assert_eq!(normalize_arxiv_id("Hep-TH/9901001").as_deref(), Some("Hep-TH/9901001"));
    }

    #[test]
    fn invalid_input_is_none() {
        assert_eq!(normalize_arxiv_id("not an id"), None);
        assert_eq!(normalize_arxiv_id(""), None);
        assert_eq!(normalize_arxiv_id("   "), None);
        assert_eq!(normalize_arxiv_id("https://example.com/"), None);
        assert_eq!(normalize_arxiv_id("123.456"), None);
    }

    #[test]
    fn version_helpers() {
        assert_eq!(strip_version("2301.12345v2"), "2301.12345");
        assert_eq!(strip_version("hep-th/9901001"), "hep-th/9901001");
        assert!(has_version("2301.12345v10"));
        assert!(!has_version("2301.12345"));
    }
}
