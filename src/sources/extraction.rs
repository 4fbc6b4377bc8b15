//! Remote PDF extraction service (MinerU-compatible task API).
//!
//! ```text
//! POST <endpoint> {url, enable_formula, enable_table, ...}  → {code, msg, data:{task_id}}
//! GET  <endpoint>/<task_id>   (every poll interval)          → {code, msg, data:{state, ...}}
//! GET  <full_zip_url>                                          → zip with Markdown
//! ```
//!
//! ## Channels
//!
//! In a direct context the service is called directly. The first direct
//! failure flips the session to the forwarding proxy for the rest of the
//! task, when one is configured. A restricted context only ever uses the
//! proxy. The result archive is downloaded directly first, then through
//! the proxy when the direct copy fails or holds no Markdown.

use super::SourceContext;
use crate::config::{resolve_endpoint, ExtractionServiceConfig, FetchPolicy, DEFAULT_EXTRACTION_PATH};
use crate::error::Arxiv2MdError;
use crate::net::proxy::ForwardProxyPayload;
use crate::net::NetworkClient;
use crate::output::MarkdownConversionResult;
use crate::progress::Stage;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Proxy timeout for task submission.
pub const PROXY_SUBMIT_TIMEOUT_MS: u64 = 20_000;
/// Proxy timeout for status polls.
pub const PROXY_POLL_TIMEOUT_MS: u64 = 15_000;

/// Keys checked first on every JSON object when looking for Markdown.
const PREFERRED_JSON_KEYS: [&str; 4] = ["markdown", "md", "content", "text"];

#[derive(Debug, Deserialize)]
struct TaskEnvelope<T> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct CreatedTask {
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskStatus {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
    #[serde(default)]
    full_zip_url: Option<String>,
    #[serde(default)]
    extract_progress: Option<ExtractProgress>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractProgress {
    #[serde(default)]
    extracted_pages: Option<u64>,
    #[serde(default)]
    total_pages: Option<u64>,
}

/// Task submission endpoint.
pub fn task_endpoint(service: &ExtractionServiceConfig) -> String {
    resolve_endpoint(&service.base_url, &service.api_path, DEFAULT_EXTRACTION_PATH)
}

/// Status endpoint: the submit URL plus the task id as one encoded segment.
///
/// ```
/// use arxiv2md::sources::extraction::status_endpoint;
/// assert_eq!(
///     status_endpoint("https://mineru.net/api/v4/extract/task/", "a b/c").unwrap(),
///     "https://mineru.net/api/v4/extract/task/a%20b%2Fc"
/// );
/// ```
pub fn status_endpoint(submit_url: &str, task_id: &str) -> Result<String, Arxiv2MdError> {
    let mut url = Url::parse(submit_url)
        .map_err(|e| Arxiv2MdError::InvalidConfig(format!("extraction endpoint '{submit_url}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Arxiv2MdError::InvalidConfig(format!("extraction endpoint '{submit_url}' cannot take a path")))?
        .pop_if_empty()
        .push(task_id);
    Ok(url.to_string())
}

/// Submit the paper's PDF, wait for the task, and return its Markdown.
pub async fn fetch_extraction_markdown(
    ctx: &SourceContext<'_>,
    service: &ExtractionServiceConfig,
) -> Result<MarkdownConversionResult, Arxiv2MdError> {
    let mut session = Session {
        ctx,
        service,
        allow_direct: ctx.net.policy() == FetchPolicy::Direct,
    };

    let submit_url = task_endpoint(service);
    ctx.stage(Stage::ExtractionSubmitting);
    info!("Submitting {} to extraction service {}", ctx.metadata.pdf_url, submit_url);

    let created: TaskEnvelope<CreatedTask> = session.request(&submit_url, Some(&submit_body(ctx, service))).await?;
    let task_id = match (created.code, created.data.and_then(|d| d.task_id)) {
        (Some(0), Some(id)) if !id.trim().is_empty() => id.trim().to_string(),
        _ => return Err(service_error(created.msg, "task submission failed")),
    };
    debug!("Extraction task id: {}", task_id);
    ctx.stage(Stage::ExtractionQueued);

    let zip_url = session.poll(&status_endpoint(&submit_url, &task_id)?).await?;

    ctx.stage(Stage::ExtractionDownloading);
    let markdown = download_markdown(ctx.net, &zip_url).await?;
    info!("Extraction service returned {} chars of Markdown", markdown.len());
    Ok(MarkdownConversionResult::plain(markdown))
}

/// Fetch the result archive directly and read its Markdown. A failed
/// download or an archive without Markdown is retried through the proxy.
async fn download_markdown(net: &NetworkClient, zip_url: &str) -> Result<String, Arxiv2MdError> {
    let direct_error = match net.fetch_direct(zip_url).await {
        Ok(bytes) => match markdown_from_zip(&bytes) {
            Ok(markdown) => return Ok(markdown),
            Err(e) => e,
        },
        Err(e) => e,
    };
    warn!("Direct result download unusable, trying proxy: {}", direct_error);
    match net.fetch_via_proxy(zip_url).await {
        Ok(Some(bytes)) => markdown_from_zip(&bytes),
        Ok(None) => Err(direct_error),
        Err(proxy_error) => Err(Arxiv2MdError::AllChannelsFailed {
            url: zip_url.to_string(),
            detail: format!("direct: {direct_error}; proxy: {proxy_error}"),
        }),
    }
}

fn submit_body(ctx: &SourceContext<'_>, service: &ExtractionServiceConfig) -> Value {
    let mut body = json!({
        "url": ctx.metadata.pdf_url,
        "enable_formula": service.enable_formula,
        "enable_table": service.enable_table,
    });
    if service.is_ocr {
        body["is_ocr"] = json!(true);
    }
    if let Some(language) = service.language.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        body["language"] = json!(language);
    }
    if let Some(version) = service.model_version.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        body["model_version"] = json!(version);
    }
    body
}

fn service_error(msg: Option<String>, fallback: &str) -> Arxiv2MdError {
    Arxiv2MdError::ExtractionService(
        msg.map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| fallback.to_string()),
    )
}

struct Session<'a, 'c> {
    ctx: &'a SourceContext<'c>,
    service: &'a ExtractionServiceConfig,
    /// Cleared after the first direct failure when a proxy can take over.
    allow_direct: bool,
}

impl Session<'_, '_> {
    /// Poll until `done`, returning the result archive URL.
    async fn poll(&mut self, status_url: &str) -> Result<String, Arxiv2MdError> {
        let config = self.ctx.config;
        let interval = Duration::from_millis(config.extraction_poll_interval_ms);
        let limit = Duration::from_secs(config.extraction_timeout_secs);
        let started = Instant::now();
        let mut running_reported = false;

        while started.elapsed() < limit {
            let status: TaskEnvelope<TaskStatus> = self.request(status_url, None).await?;
            let data = match (status.code, status.data) {
                (Some(0), Some(data)) => data,
                (_, _) => return Err(service_error(status.msg, "status request failed")),
            };

            let state = data.state.as_deref().unwrap_or_default().trim().to_ascii_lowercase();
            match state.as_str() {
                "done" => {
                    return data
                        .full_zip_url
                        .map(|u| u.trim().to_string())
                        .filter(|u| !u.is_empty())
                        .ok_or_else(|| {
                            Arxiv2MdError::ExtractionService("task finished without a result archive".into())
                        });
                }
                "failed" => {
                    let detail = data
                        .err_msg
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "no reason given".into());
                    return Err(Arxiv2MdError::ExtractionFailed(detail));
                }
                "running" => {
                    if !running_reported {
                        running_reported = true;
                        self.ctx.stage(Stage::ExtractionRunning);
                    }
                    let progress = data.extract_progress.unwrap_or_default();
                    debug!(
                        "Extraction running: {:?}/{:?} pages",
                        progress.extracted_pages, progress.total_pages
                    );
                    self.report(&state, progress.extracted_pages, progress.total_pages);
                }
                // pending, converting, waiting-file and anything unknown keep polling.
                other => {
                    debug!("Extraction state: {}", other);
                    self.report(other, None, None);
                }
            }
            tokio::time::sleep(interval).await;
        }

        Err(Arxiv2MdError::ExtractionTimeout {
            secs: config.extraction_timeout_secs,
        })
    }

    fn report(&self, state: &str, extracted: Option<u64>, total: Option<u64>) {
        if let Some(cb) = self.ctx.progress() {
            cb.on_extraction_progress(state, extracted, total);
        }
    }

    async fn request<T: DeserializeOwned>(&mut self, url: &str, body: Option<&Value>) -> Result<T, Arxiv2MdError> {
        if self.allow_direct {
            match self.request_direct(url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if self.ctx.net.proxy().is_some() => {
                    warn!("Direct extraction-service request failed, switching to proxy: {}", e);
                    self.allow_direct = false;
                }
                Err(e) => return Err(e),
            }
        }
        self.request_via_proxy(url, body).await
    }

    async fn request_direct<T: DeserializeOwned>(&self, url: &str, body: Option<&Value>) -> Result<T, Arxiv2MdError> {
        let method = if body.is_some() { Method::POST } else { Method::GET };
        let mut request = self
            .ctx
            .net
            .http()
            .request(method, url)
            .header(ACCEPT, "application/json")
            .bearer_auth(self.service.api_key.trim())
            .timeout(self.ctx.net.timeout());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Arxiv2MdError::ExtractionService(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Arxiv2MdError::ExtractionService(format!("HTTP {}", status.as_u16())));
        }
        response
            .json()
            .await
            .map_err(|e| Arxiv2MdError::ExtractionService(format!("invalid JSON: {e}")))
    }

    async fn request_via_proxy<T: DeserializeOwned>(&self, url: &str, body: Option<&Value>) -> Result<T, Arxiv2MdError> {
        let Some(proxy) = self.ctx.net.proxy() else {
            return Err(Arxiv2MdError::ExtractionService(
                "a forwarding proxy is required to reach the extraction service from a restricted context".into(),
            ));
        };
        let payload = match body {
            Some(body) => ForwardProxyPayload::post_json(url, body)
                .timeout_ms(PROXY_SUBMIT_TIMEOUT_MS)
                .header("Content-Type", "application/json"),
            None => ForwardProxyPayload::get(url).timeout_ms(PROXY_POLL_TIMEOUT_MS),
        }
        .header("Accept", "application/json")
        .header("Authorization", &format!("Bearer {}", self.service.api_key.trim()))
        .response_encoding("text");

        let text = proxy.forward(&payload).await?.text()?;
        serde_json::from_str(&text)
            .map_err(|e| Arxiv2MdError::ExtractionService(format!("invalid JSON via proxy: {e}")))
    }
}

/// First non-empty `.md` entry, else the first Markdown-looking string in
/// any `.json` entry.
pub fn markdown_from_zip(bytes: &[u8]) -> Result<String, Arxiv2MdError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Arxiv2MdError::Archive(format!("zip: {e}")))?;

    let mut json_entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable zip entry {}: {}", index, e);
                continue;
            }
        };
        let name = entry.name().to_ascii_lowercase();
        if name.ends_with(".json") {
            json_entries.push(index);
            continue;
        }
        if !name.ends_with(".md") {
            continue;
        }
        let mut raw = Vec::new();
        if let Err(e) = entry.read_to_end(&mut raw) {
            warn!("Skipping unreadable Markdown entry {}: {}", name, e);
            continue;
        }
        let text = String::from_utf8_lossy(&raw);
        let text = text.trim();
        if !text.is_empty() {
            debug!("Markdown taken from {}", name);
            return Ok(text.to_string());
        }
    }

    for index in json_entries {
        let mut raw = Vec::new();
        let read = archive
            .by_index(index)
            .map_err(|e| e.to_string())
            .and_then(|mut entry| entry.read_to_end(&mut raw).map_err(|e| e.to_string()));
        if let Err(e) = read {
            warn!("Skipping unreadable JSON entry {}: {}", index, e);
            continue;
        }
        let Ok(value) = serde_json::from_slice::<Value>(&raw) else {
            continue;
        };
        if let Some(markdown) = markdown_from_json(&value) {
            return Ok(markdown);
        }
    }

    Err(Arxiv2MdError::ExtractionNoMarkdown)
}

/// Depth-first search for the first non-blank string, preferring the
/// well-known keys of each object.
pub fn markdown_from_json(value: &Value) -> Option<String> {
    let mut stack = vec![value];
    while let Some(current) = stack.pop() {
        match current {
            Value::String(s) => {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
            Value::Array(items) => stack.extend(items.iter()),
            Value::Object(map) => {
                let preferred = PREFERRED_JSON_KEYS
                    .iter()
                    .filter_map(|key| map.get(*key).and_then(Value::as_str))
                    .map(str::trim)
                    .find(|s| !s.is_empty());
                if let Some(found) = preferred {
                    return Some(found.to_string());
                }
                stack.extend(
                    map.values()
                        .filter(|v| matches!(v, Value::Object(_) | Value::Array(_) | Value::String(_))),
                );
            }
            _ => {}
        }
    }
    None
}
