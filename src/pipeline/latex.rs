//! LaTeX source → Markdown.
//!
//! A fixed sequence of regex passes over the main `.tex` file. This is not a
//! TeX engine: it handles the macros arXiv submissions actually lean on and
//! leaves everything else as literal text.
//!
//! Pass order matters:
//!
//! 1. Comments, then keep only the `document` environment (whole file if absent)
//! 2. Labels, citations, cross-references, footnotes
//! 3. Font macros → Markdown emphasis
//! 4. `itemize` / `enumerate` → lists
//! 5. Sectioning → `##` / `###` / `####`
//! 6. Display and inline math → `$$` / `$`
//! 7. `\includegraphics` → image links (literal path, never resolved)
//! 8. Bibliography removed, floats unwrapped, spacing macros
//! 9. Escaped punctuation
//! 10. Whitespace collapse

use crate::config::Labels;
use crate::metadata::ArxivMetadata;
use crate::output::MarkdownConversionResult;
use crate::pipeline::blocks::{render_prefix, with_prefix, CompressionBlock};
use crate::pipeline::postprocess::{collapse_blank_lines, normalize_whitespace, trim_trailing_whitespace};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// One `.tex` member of a source archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TexFile {
    pub name: String,
    pub content: String,
}

/// Convert the main `.tex` file of a paper.
///
/// Returns `None` when the document produces no Markdown body.
pub fn convert_latex(
    content: &str,
    metadata: &ArxivMetadata,
    labels: &Labels,
    omit_references: bool,
) -> Option<MarkdownConversionResult> {
    let content = strip_comments(content);
    let references = extract_references(&content);
    let body = latex_to_markdown(&content, labels, omit_references);
    if body.is_empty() {
        return None;
    }

    let mut blocks = Vec::new();
    if !metadata.authors.is_empty() {
        blocks.push(CompressionBlock::authors(labels, &metadata.authors.join(", ")));
    }
    if let Some(references) = references.filter(|_| !omit_references) {
        blocks.push(CompressionBlock::references(labels, &references));
    }
    let prefix = render_prefix(&blocks);
    let combined = with_prefix(&prefix, &body);

    Some(MarkdownConversionResult {
        markdown: combined.clone(),
        llm_source: combined,
        llm_full_source: body,
        prefix,
    })
}

/// The file holding `\begin{document}`, else the longest one.
pub fn select_main_tex(files: &[TexFile]) -> Option<&TexFile> {
    if let Some(main) = files.iter().find(|f| f.content.contains(r"\begin{document}")) {
        return Some(main);
    }
    let mut best: Option<&TexFile> = None;
    for file in files {
        let longer = best.map_or(true, |b| file.content.chars().count() > b.content.chars().count());
        if longer {
            best = Some(file);
        }
    }
    best
}

// ── Comments ─────────────────────────────────────────────────────────────────

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(^|[^\\])%.*$").unwrap());

/// Drop `%` comments to end of line; `\%` is a literal percent sign.
pub fn strip_comments(input: &str) -> String {
    RE_COMMENT.replace_all(input, "$1").into_owned()
}

// ── References ───────────────────────────────────────────────────────────────

static RE_BIBLIOGRAPHY_BODY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\\begin\{thebibliography\}(.*?)\\end\{thebibliography\}").unwrap());

static RE_BIBITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\\bibitem(?:\[[^\]]*\])?\{[^}]*\}").unwrap());

/// One line per `\bibitem`, whitespace-normalised.
///
/// Text before the first `\bibitem` (the widest-label argument, usually)
/// is not an entry. Without any `\bibitem` the whole environment becomes a
/// single line.
pub fn extract_references(content: &str) -> Option<String> {
    let inner = RE_BIBLIOGRAPHY_BODY.captures(content)?.get(1)?.as_str();

    let entries: Vec<String> = RE_BIBITEM
        .split(inner)
        .skip(1)
        .map(|chunk| normalize_whitespace(&chunk.replace(r"\newblock", " ")))
        .filter(|entry| !entry.is_empty())
        .collect();
    if !entries.is_empty() {
        return Some(entries.join("\n"));
    }

    let whole = normalize_whitespace(&inner.replace(r"\newblock", " "));
    (!whole.is_empty()).then_some(whole)
}

// ── Body conversion ──────────────────────────────────────────────────────────

static RE_DOCUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{document\}(.*?)\\end\{document\}").unwrap());
static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{[^}]*\}").unwrap());
static RE_CITE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\cite[a-zA-Z]*\*?(?:\[[^\]]*\])*\{[^}]*\}").unwrap());
static RE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\ref\{([^}]*)\}").unwrap());
static RE_FOOTNOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\footnote\{([^}]*)\}").unwrap());
static RE_TEXTBF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\textbf\{([^}]*)\}").unwrap());
static RE_TEXTIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\textit\{([^}]*)\}").unwrap());
static RE_EMPH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\emph\{([^}]*)\}").unwrap());

static RE_ITEMIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{itemize\}(.*?)\\end\{itemize\}").unwrap());
static RE_ENUMERATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{enumerate\}(.*?)\\end\{enumerate\}").unwrap());
static RE_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\item\b").unwrap());

static RE_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\section\*?\{([^}]*)\}").unwrap());
static RE_SUBSECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\subsection\*?\{([^}]*)\}").unwrap());
static RE_SUBSUBSECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\subsubsection\*?\{([^}]*)\}").unwrap());

/// No backreferences in `regex`, so one pattern per environment.
static RE_EQUATIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["equation", "align", "gather", "multline"]
        .iter()
        .map(|env| Regex::new(&format!(r"(?s)\\begin\{{{env}\*?\}}(.*?)\\end\{{{env}\*?\}}")).unwrap())
        .collect()
});

static RE_INCLUDEGRAPHICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\includegraphics(?:\[[^\]]*\])?\{([^}]*)\}").unwrap());
static RE_THEBIBLIOGRAPHY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\\begin\{thebibliography\}.*?\\end\{thebibliography\}").unwrap());
static RE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{table\*?\}(.*?)\\end\{table\*?\}").unwrap());
static RE_FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\begin\{figure\*?\}(.*?)\\end\{figure\*?\}").unwrap());
static RE_TILDES: Lazy<Regex> = Lazy::new(|| Regex::new(r"~+").unwrap());
static RE_MATH_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:text|mathrm|mathit|mathbf)\s*\{([^}]*)\}").unwrap());
static RE_TRAILING_REFERENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\n##\s*(?:references|bibliography).*").unwrap());

/// Convert LaTeX source to a Markdown body (no compression blocks).
pub fn latex_to_markdown(content: &str, labels: &Labels, omit_references: bool) -> String {
    // A commented-out `\end{document}` must not end the body early.
    let stripped = strip_comments(content);
    let body = match RE_DOCUMENT.captures(&stripped).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => stripped.as_str(),
    };

    // ── Step 2: Cross-references ─────────────────────────────────────────
    let mut md = body.to_string();
    md = RE_LABEL.replace_all(&md, "").into_owned();
    md = RE_CITE.replace_all(&md, "").into_owned();
    md = RE_REF.replace_all(&md, "$1").into_owned();
    md = RE_FOOTNOTE.replace_all(&md, " ($1) ").into_owned();

    // ── Step 3: Emphasis ─────────────────────────────────────────────────
    md = RE_TEXTBF.replace_all(&md, "**$1**").into_owned();
    md = RE_TEXTIT.replace_all(&md, "*$1*").into_owned();
    md = RE_EMPH.replace_all(&md, "*$1*").into_owned();

    // ── Step 4: Lists ────────────────────────────────────────────────────
    md = RE_ITEMIZE
        .replace_all(&md, |c: &Captures| convert_list(&c[1], false))
        .into_owned();
    md = RE_ENUMERATE
        .replace_all(&md, |c: &Captures| convert_list(&c[1], true))
        .into_owned();

    // ── Step 5: Headings ─────────────────────────────────────────────────
    md = RE_SECTION
        .replace_all(&md, |c: &Captures| format!("\n## {}\n", c[1].trim()))
        .into_owned();
    md = RE_SUBSECTION
        .replace_all(&md, |c: &Captures| format!("\n### {}\n", c[1].trim()))
        .into_owned();
    md = RE_SUBSUBSECTION
        .replace_all(&md, |c: &Captures| format!("\n#### {}\n", c[1].trim()))
        .into_owned();

    // ── Step 6: Math ─────────────────────────────────────────────────────
    for re in RE_EQUATIONS.iter() {
        md = re
            .replace_all(&md, |c: &Captures| format!("\n\n$$\n{}\n$$\n\n", c[1].trim()))
            .into_owned();
    }
    md = md
        .replace(r"\[", "$$\n")
        .replace(r"\]", "\n$$")
        .replace(r"\(", "$")
        .replace(r"\)", "$");

    // ── Step 7: Figures ──────────────────────────────────────────────────
    md = RE_INCLUDEGRAPHICS
        .replace_all(&md, |c: &Captures| format!("![{}]({})", labels.figure, &c[1]))
        .into_owned();

    // ── Step 8: Bibliography, floats, spacing ────────────────────────────
    md = RE_THEBIBLIOGRAPHY.replace_all(&md, "").into_owned();
    md = RE_TABLE
        .replace_all(&md, |c: &Captures| format!("\n\n{}\n\n", c[1].trim()))
        .into_owned();
    md = RE_FIGURE
        .replace_all(&md, |c: &Captures| format!("\n\n{}\n\n", c[1].trim()))
        .into_owned();
    md = md.replace(r"\newline", "\n");
    md = RE_TILDES.replace_all(&md, " ").into_owned();
    md = RE_MATH_TEXT.replace_all(&md, "$1").into_owned();

    // ── Step 9: Escaped punctuation ──────────────────────────────────────
    md = md
        .replace(r"\%", "%")
        .replace(r"\_", "_")
        .replace(r"\&", "&")
        .replace(r"\#", "#")
        .replace(r"\$", "$");

    if omit_references {
        md = RE_TRAILING_REFERENCES.replace(&md, "").into_owned();
    }

    // ── Step 10: Whitespace ──────────────────────────────────────────────
    let md = collapse_blank_lines(&md);
    trim_trailing_whitespace(&md).trim().to_string()
}

/// Split on `\item`; anything before the first item (options, spacing) is
/// not an item.
fn convert_list(items: &str, numbered: bool) -> String {
    let parts: Vec<&str> = RE_ITEM
        .split(items)
        .skip(1)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            if numbered {
                format!("{}. {}", i + 1, part)
            } else {
                format!("- {part}")
            }
        })
        .collect();
    format!("\n{}\n", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(src: &str) -> String {
        latex_to_markdown(src, &Labels::default(), false)
    }

    fn metadata() -> ArxivMetadata {
        ArxivMetadata {
            title: "T".into(),
            pdf_url: "https://arxiv.org/pdf/2301.12345v1.pdf".into(),
            canonical_id: "2301.12345v1".into(),
            versioned_id: "2301.12345v1".into(),
            authors: vec!["Alice".into(), "Bob".into()],
            summary: None,
        }
    }

    #[test]
    fn bibliography_split_into_entries() {
        let src = r"\begin{thebibliography}{99}
\bibitem{a} Foo
\bibitem{b}   Bar \newblock  Baz
\end{thebibliography}";
        assert_eq!(extract_references(src).as_deref(), Some("Foo\nBar Baz"));
    }

    #[test]
    fn bibliography_with_optional_labels() {
        let src = r"\begin{thebibliography}{}\bibitem[Smith(2020)]{s} Smith.\end{thebibliography}";
        assert_eq!(extract_references(src).as_deref(), Some("Smith."));
        assert_eq!(extract_references("no bibliography"), None);
    }

    #[test]
    fn only_document_body_is_converted() {
        let src = r"\documentclass{article}\title{X}\begin{document}Hello.\end{document}";
        assert_eq!(md(src), "Hello.");
    }

    #[test]
    fn comments_stripped_but_escaped_percent_kept() {
        assert_eq!(md("50\\% done % hidden\nnext"), "50% done\nnext");
        assert_eq!(md("% whole line\nText"), "Text");
    }

    #[test]
    fn sectioning_and_emphasis() {
        let out = md(r"\section{Intro}\textbf{bold} and \emph{em} \subsection*{Sub}\subsubsection{Deep}");
        assert!(out.contains("## Intro"));
        assert!(out.contains("**bold** and *em*"));
        assert!(out.contains("### Sub"));
        assert!(out.contains("#### Deep"));
    }

    #[test]
    fn labels_cites_refs_footnotes() {
        let out = md(r"See Fig.~\ref{fig1}\label{x}\cite{key} and\footnote{a note}.");
        assert_eq!(out, "See Fig. fig1 and (a note) .");
    }

    #[test]
    fn lists() {
        let out = md(r"\begin{itemize}\item One \item Two\end{itemize}");
        assert_eq!(out, "- One\n- Two");
        let out = md("\\begin{enumerate}[label=(\\alph*)]\n\\item A\n\\item B\n\\end{enumerate}");
        assert_eq!(out, "1. A\n2. B");
    }

    #[test]
    fn equations_become_display_math() {
        let out = md(r"\begin{equation}a=b\label{e}\end{equation} \begin{align*}x&=y\end{align*}");
        assert!(out.contains("$$\na=b\n$$"), "{out}");
        assert!(out.contains("$$\nx&=y\n$$"), "{out}");
    }

    #[test]
    fn bracket_delimiters() {
        assert_eq!(md(r"\[x^2\]"), "$$\nx^2\n$$");
        assert_eq!(md(r"where \(x_1\) holds"), "where $x_1$ holds");
    }

    #[test]
    fn includegraphics_keeps_literal_path() {
        let out = md(r"\includegraphics[width=0.5\linewidth]{figs/plot.pdf}");
        assert_eq!(out, "![Figure](figs/plot.pdf)");
    }

    #[test]
    fn floats_unwrapped_and_bibliography_removed() {
        let out = md(r"\begin{figure}[t]Caption text\end{figure}\begin{thebibliography}{9}\bibitem{a} A\end{thebibliography}");
        assert_eq!(out, "[t]Caption text");
    }

    #[test]
    fn escapes_and_math_text() {
        assert_eq!(md(r"\& \# \_ \$ $\mathrm{d}x$ \text {ok}"), "& # _ $ $dx$ ok");
    }

    #[test]
    fn trailing_spaces_trimmed_after_collapse() {
        assert_eq!(md("first   \n\n\n\nsecond \t\nthird"), "first\n\nsecond\nthird");
    }

    #[test]
    fn omit_references_strips_trailing_heading() {
        let src = r"\section{Intro}Body\section*{References}Gone";
        let out = latex_to_markdown(src, &Labels::default(), true);
        assert_eq!(out, "## Intro\nBody");
    }

    #[test]
    fn main_file_selection() {
        let files = vec![
            TexFile { name: "macros.tex".into(), content: "x".repeat(500) },
            TexFile { name: "main.tex".into(), content: r"\begin{document}\end{document}".into() },
        ];
        assert_eq!(select_main_tex(&files).unwrap().name, "main.tex");

        let files = vec![
            TexFile { name: "a.tex".into(), content: "short".into() },
            TexFile { name: "b.tex".into(), content: "much longer".into() },
            TexFile { name: "c.tex".into(), content: "also longer".into() },
        ];
        assert_eq!(select_main_tex(&files).unwrap().name, "b.tex");
        assert!(select_main_tex(&[]).is_none());
    }

    #[test]
    fn full_conversion_has_author_and_reference_blocks() {
        let src = r"\begin{document}\section{Intro}Text.
\begin{thebibliography}{9}\bibitem{a} Ref A.\end{thebibliography}\end{document}";
        let result = convert_latex(src, &metadata(), &Labels::default(), false).unwrap();
        assert!(result.prefix.starts_with("## Authors\n\n```text\nAuthors: Alice, Bob\n```"));
        assert!(result.prefix.contains("References:\nRef A."));
        assert_eq!(result.markdown, result.llm_source);
        assert_eq!(result.llm_full_source, "## Intro\nText.");
        assert!(result.markdown.ends_with("## Intro\nText."));
    }

    #[test]
    fn empty_body_is_none() {
        let src = "\\begin{document}\n% nothing\n\\end{document}";
        assert!(convert_latex(src, &metadata(), &Labels::default(), false).is_none());
    }
}
