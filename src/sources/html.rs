//! arXiv HTML rendering.

use super::SourceContext;
use crate::error::Arxiv2MdError;
use crate::output::MarkdownConversionResult;
use crate::pipeline::html::convert_html;
use crate::progress::Stage;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tracing::{debug, info};

/// `<html_base>/<versioned id>`.
pub fn html_url(html_base: &str, versioned_id: &str) -> String {
    format!("{}/{}", html_base.trim_end_matches('/'), versioned_id)
}

/// Fetch and convert the HTML rendering.
///
/// `Ok(None)` when arXiv has no rendering (404, empty body) or the page
/// holds no convertible article.
pub async fn fetch_html_markdown(
    ctx: &SourceContext<'_>,
) -> Result<Option<MarkdownConversionResult>, Arxiv2MdError> {
    ctx.stage(Stage::FetchingHtml);
    let url = html_url(&ctx.config.endpoints.html_base, &ctx.metadata.versioned_id);
    info!("Fetching HTML full text: {}", url);

    let response = ctx
        .net
        .http()
        .get(&url)
        .header(ACCEPT, "text/html")
        .timeout(ctx.net.timeout())
        .send()
        .await
        .map_err(|e| Arxiv2MdError::DownloadFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        debug!("No HTML rendering for {}", ctx.metadata.versioned_id);
        return Ok(None);
    }
    if !status.is_success() {
        return Err(Arxiv2MdError::HtmlFetch {
            status: status.as_u16(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| Arxiv2MdError::DownloadFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    if body.trim().is_empty() {
        debug!("Empty HTML body for {}", ctx.metadata.versioned_id);
        return Ok(None);
    }

    // Relative links resolve under the paper's own directory.
    let base_url = format!("{url}/");
    convert_html(
        &body,
        ctx.metadata,
        &base_url,
        &ctx.config.labels,
        ctx.config.omit_references,
    )
}
