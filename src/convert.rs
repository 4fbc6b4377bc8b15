//! Conversion entry points.
//!
//! [`convert`] runs the whole pipeline for one paper: identifier →
//! metadata → document source → optional refinement. [`fetch_pdf`] is the
//! lighter path used when the caller wants the PDF itself rather than its
//! text.

use crate::config::{ConversionConfig, Engine};
use crate::error::Arxiv2MdError;
use crate::identifier::normalize_arxiv_id;
use crate::metadata::{fetch_metadata, ArxivMetadata};
use crate::net::fallback::{first_success, FallbackError, Outcome, Strategy};
use crate::net::NetworkClient;
use crate::output::{ConversionOutput, ConversionStats, MarkdownConversionResult, PdfDownload, SourceKind};
use crate::pipeline::llm::{ChatCompletionsClient, MarkdownRefiner};
use crate::pipeline::refine::{refine_markdown, RefineOptions};
use crate::progress::Stage;
use crate::sources::extraction::fetch_extraction_markdown;
use crate::sources::html::fetch_html_markdown;
use crate::sources::latex::fetch_latex_markdown;
use crate::sources::SourceContext;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest file name stem produced by [`pdf_file_name`], in characters.
const MAX_FILE_STEM_CHARS: usize = 120;

/// Convert an arXiv paper to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`: arXiv identifier, `arXiv:` reference or arxiv.org URL
/// * `config`: Conversion configuration
///
/// # Errors
/// - [`Arxiv2MdError::InvalidIdentifier`] before any network access
/// - metadata errors ([`Arxiv2MdError::PaperNotFound`], ...)
/// - [`Arxiv2MdError::FullTextUnavailable`] when neither HTML nor LaTeX
///   converts
/// - extraction-service and LLM errors when those engines are selected;
///   neither falls back to the plain conversion
pub async fn convert(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Arxiv2MdError> {
    let total_start = Instant::now();
    let net = NetworkClient::new(config)?;

    // ── Step 1: Identifier + metadata ────────────────────────────────────
    let metadata_start = Instant::now();
    let metadata = resolve_metadata(input.as_ref(), &net, config).await?;
    let metadata_duration_ms = metadata_start.elapsed().as_millis() as u64;
    info!("Converting arXiv:{} \"{}\"", metadata.versioned_id, metadata.title);

    // ── Step 2: Document source ──────────────────────────────────────────
    let fetch_start = Instant::now();
    let ctx = SourceContext::new(&net, config, &metadata);
    let (source, converted) = match &config.engine {
        Engine::ExtractionService(service) => (
            SourceKind::ExtractionService,
            fetch_extraction_markdown(&ctx, service).await?,
        ),
        Engine::None | Engine::Llm(_) => fetch_full_text(&ctx).await?,
    };
    let fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;
    info!("Full text from {} in {}ms", source, fetch_duration_ms);

    // ── Step 3: Optional LLM refinement ──────────────────────────────────
    let refine_start = Instant::now();
    let mut stats = ConversionStats::default();
    let (markdown, refined) = match &config.engine {
        Engine::Llm(llm) if source != SourceKind::ExtractionService => {
            let refiner: Arc<dyn MarkdownRefiner> = match &config.refiner {
                Some(refiner) => Arc::clone(refiner),
                None => Arc::new(ChatCompletionsClient::new(net.http().clone(), llm)),
            };
            let options = RefineOptions {
                full_input: llm.full_input,
                concurrency: config.llm_concurrency,
                section_timeout: Duration::from_secs(config.section_timeout_secs),
                full_input_timeout: Duration::from_secs(config.full_input_timeout_secs),
            };
            let report = refine_markdown(
                &converted,
                refiner.as_ref(),
                &options,
                &config.labels,
                config.progress_callback.as_ref(),
            )
            .await?;
            stats.sections_total = report.sections_total;
            stats.sections_refined = report.sections_refined;
            (report.markdown, true)
        }
        _ => (converted.markdown.trim().to_string(), false),
    };
    let refine_duration_ms = if refined {
        refine_start.elapsed().as_millis() as u64
    } else {
        0
    };

    // ── Step 4: Stats ────────────────────────────────────────────────────
    stats.markdown_len = markdown.len();
    stats.metadata_duration_ms = metadata_duration_ms;
    stats.fetch_duration_ms = fetch_duration_ms;
    stats.refine_duration_ms = refine_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Conversion complete: {} chars from {}{}, {}ms total",
        markdown.len(),
        source,
        if refined { " (refined)" } else { "" },
        stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(source, markdown.len());
    }

    Ok(ConversionOutput {
        markdown,
        metadata,
        source,
        refined,
        stats,
    })
}

/// Convert a paper and write the Markdown to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Arxiv2MdError> {
    let output = convert(input, config).await?;
    let path = output_path.as_ref();
    write_atomic(path, output.markdown.as_bytes(), "md.tmp").await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Arxiv2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Arxiv2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input, config))
}

/// Resolve metadata and download the paper's PDF through the channels the
/// fetch policy allows.
pub async fn fetch_pdf(
    input: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<PdfDownload, Arxiv2MdError> {
    let net = NetworkClient::new(config)?;
    let metadata = resolve_metadata(input.as_ref(), &net, config).await?;
    download_pdf(&net, config, metadata).await
}

/// File name for a stored PDF.
///
/// ```
/// use arxiv2md::pdf_file_name;
/// assert_eq!(
///     pdf_file_name("Attention Is All You Need: v2?", "1706.03762v7"),
///     "Attention_Is_All_You_Need_v2.pdf"
/// );
/// assert_eq!(pdf_file_name(" <> ", "hep-th/9901001v1"), "hep-th_9901001v1.pdf");
/// ```
pub fn pdf_file_name(title: &str, versioned_id: &str) -> String {
    let sanitized: String = title
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    let words: Vec<&str> = sanitized.split_whitespace().collect();
    let stem = if words.is_empty() {
        versioned_id.trim().replace('/', "_")
    } else {
        words.join("_")
    };
    let truncated: String = stem.chars().take(MAX_FILE_STEM_CHARS).collect();
    format!("{truncated}.pdf")
}

// ── Internal helpers ─────────────────────────────────────────────────────

pub(crate) async fn resolve_metadata(
    input: &str,
    net: &NetworkClient,
    config: &ConversionConfig,
) -> Result<ArxivMetadata, Arxiv2MdError> {
    let id = normalize_arxiv_id(input).ok_or_else(|| Arxiv2MdError::InvalidIdentifier {
        input: input.trim().to_string(),
    })?;
    debug!("Normalised '{}' to {}", input.trim(), id);

    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(Stage::FetchingMetadata);
    }
    fetch_metadata(net.http(), &config.endpoints, &id, net.timeout()).await
}

pub(crate) async fn download_pdf(
    net: &NetworkClient,
    config: &ConversionConfig,
    metadata: ArxivMetadata,
) -> Result<PdfDownload, Arxiv2MdError> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(Stage::DownloadingPdf);
    }
    let bytes = net.fetch_binary(&metadata.pdf_url).await?;
    let file_name = pdf_file_name(&metadata.title, &metadata.versioned_id);
    info!("Downloaded {} ({} bytes)", file_name, bytes.len());
    Ok(PdfDownload {
        metadata,
        file_name,
        bytes,
    })
}

/// HTML first, LaTeX second.
async fn fetch_full_text(
    ctx: &SourceContext<'_>,
) -> Result<(SourceKind, MarkdownConversionResult), Arxiv2MdError> {
    let strategies = vec![
        Strategy::new("html", async move {
            match fetch_html_markdown(ctx).await {
                Ok(Some(md)) => Outcome::Success((SourceKind::Html, md)),
                Ok(None) => Outcome::NotApplicable,
                Err(e) => {
                    warn!("HTML conversion failed, falling back to LaTeX: {}", e);
                    Outcome::Failed(e)
                }
            }
        }),
        Strategy::new("latex", async move {
            match fetch_latex_markdown(ctx).await {
                Ok(Some(md)) => Outcome::Success((SourceKind::Latex, md)),
                Ok(None) => Outcome::NotApplicable,
                Err(e) => {
                    warn!("LaTeX conversion failed: {}", e);
                    Outcome::Failed(e)
                }
            }
        }),
    ];

    match first_success(strategies).await {
        Ok((_, found)) => Ok(found),
        Err(FallbackError::Fatal(e)) => Err(e),
        Err(FallbackError::Exhausted(ex)) => {
            warn!("No full text for {}: {}", ctx.metadata.versioned_id, ex.summary());
            Err(Arxiv2MdError::FullTextUnavailable {
                id: ctx.metadata.versioned_id.clone(),
            })
        }
    }
}

/// Write `bytes` to `path` through a sibling temp file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8], tmp_extension: &str) -> Result<(), Arxiv2MdError> {
    let write_err = |source| Arxiv2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension(tmp_extension);
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_sanitises_title() {
        assert_eq!(pdf_file_name("A  b\tc", "1"), "A_b_c.pdf");
        assert_eq!(pdf_file_name(r#"x\/:*?"<>|y"#, "1"), "xy.pdf");
        assert_eq!(pdf_file_name("", "2301.12345v1"), "2301.12345v1.pdf");
    }

    #[test]
    fn file_name_truncates_on_char_boundary() {
        let title = "é".repeat(200);
        let name = pdf_file_name(&title, "1");
        assert_eq!(name.chars().count(), MAX_FILE_STEM_CHARS + ".pdf".len());
        assert!(name.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn invalid_identifier_needs_no_network() {
        let config = ConversionConfig::builder()
            .endpoints(crate::config::ArxivEndpoints::rooted_at("http://127.0.0.1:9"))
            .build()
            .unwrap();
        let err = convert("definitely not an id", &config).await.unwrap_err();
        assert!(matches!(err, Arxiv2MdError::InvalidIdentifier { .. }));
    }

    #[tokio::test]
    async fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("paper.md");
        write_atomic(&path, b"# Hi", "md.tmp").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Hi");
        assert!(!path.with_extension("md.tmp").exists());
    }
}
