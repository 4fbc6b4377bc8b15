//! Note-taking host integration.
//!
//! A host is wherever the result ends up: a note editor that accepts
//! Markdown and stores binary assets. [`NoteHost`] is the narrow interface
//! the pipeline needs; [`KernelHost`] implements it over a SiYuan-style
//! HTTP kernel API.
//!
//! ```text
//! negotiate ──▶ FullText: convert ─────────────────────────────▶ insert text
//!          └──▶ Pdf:      list assets ─▶ reuse  ─┐
//!                                    └─▶ download ─▶ upload ───▶ insert link
//! ```
//!
//! Capabilities are checked once, before any network call, so a host that
//! cannot finish the job fails fast with [`Arxiv2MdError::HostCapability`].

use crate::config::{ConversionConfig, ProxyConfig};
use crate::convert::{convert, download_pdf, pdf_file_name, resolve_metadata};
use crate::error::Arxiv2MdError;
use crate::metadata::ArxivMetadata;
use crate::net::NetworkClient;
use crate::output::SourceKind;
use crate::progress::Stage;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Asset directory as seen from documents.
pub const ASSETS_DIR: &str = "/assets/";
/// Prefix the kernel's file API puts in front of document paths.
const WORKSPACE_DATA_DIR: &str = "/data";

/// What a host can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    pub insert_markdown: bool,
    pub upload_asset: bool,
    /// Optional: without it PDF mode always uploads.
    pub list_assets: bool,
}

/// One entry of the host's asset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub name: String,
    pub is_dir: bool,
    /// Path that documents use to link the asset.
    pub path: String,
}

/// What to insert for a paper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// A link to the stored PDF.
    #[default]
    Pdf,
    /// The converted full text.
    FullText,
}

/// Result of [`insert_paper`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub mode: InsertMode,
    pub metadata: ArxivMetadata,
    /// Exactly what was handed to the host.
    pub inserted: String,
    /// Full-text mode only.
    pub source: Option<SourceKind>,
    /// PDF mode only.
    pub asset_path: Option<String>,
    /// `true` when an existing asset with the same name was linked instead
    /// of uploading a new copy.
    pub reused_asset: bool,
}

/// The host application the paper is inserted into.
#[async_trait]
pub trait NoteHost: Send + Sync {
    fn capabilities(&self) -> HostCapabilities;

    /// Insert Markdown at the current position.
    async fn insert_markdown(&self, markdown: &str) -> Result<(), Arxiv2MdError>;

    /// Store a binary asset and return the path documents link it by.
    async fn upload_asset(&self, bytes: Vec<u8>, file_name: &str) -> Result<String, Arxiv2MdError> {
        let _ = (bytes, file_name);
        Err(Arxiv2MdError::HostCapability {
            missing: "asset upload".into(),
        })
    }

    /// List `dir` (a document-side path such as [`ASSETS_DIR`]).
    async fn list_assets(&self, dir: &str) -> Result<Vec<AssetEntry>, Arxiv2MdError> {
        let _ = dir;
        Err(Arxiv2MdError::HostCapability {
            missing: "asset listing".into(),
        })
    }
}

/// Check that `host` can complete `mode`.
pub fn negotiate(host: &dyn NoteHost, mode: InsertMode) -> Result<HostCapabilities, Arxiv2MdError> {
    let caps = host.capabilities();
    let mut missing = Vec::new();
    if !caps.insert_markdown {
        missing.push("markdown insertion");
    }
    if mode == InsertMode::Pdf && !caps.upload_asset {
        missing.push("asset upload");
    }
    if !missing.is_empty() {
        return Err(Arxiv2MdError::HostCapability {
            missing: missing.join(", "),
        });
    }
    if mode == InsertMode::Pdf && !caps.list_assets {
        debug!("Host cannot list assets; existing PDFs will not be reused");
    }
    Ok(caps)
}

/// Fetch a paper and insert it into `host`.
pub async fn insert_paper(
    host: &dyn NoteHost,
    input: &str,
    mode: InsertMode,
    config: &ConversionConfig,
) -> Result<InsertOutcome, Arxiv2MdError> {
    let caps = negotiate(host, mode)?;

    let outcome = match mode {
        InsertMode::FullText => {
            let output = convert(input, config).await?;
            InsertOutcome {
                mode,
                metadata: output.metadata,
                inserted: with_trailing_newline(&output.markdown),
                source: Some(output.source),
                asset_path: None,
                reused_asset: false,
            }
        }
        InsertMode::Pdf => {
            let net = NetworkClient::new(config)?;
            let metadata = resolve_metadata(input, &net, config).await?;
            let file_name = pdf_file_name(&metadata.title, &metadata.versioned_id);

            let existing = if caps.list_assets {
                stage(config, Stage::CheckingExistingAsset);
                find_existing_asset(host, ASSETS_DIR, &file_name).await
            } else {
                None
            };

            let (metadata, asset_path, reused_asset) = match existing {
                Some(path) => {
                    info!("Reusing existing asset {}", path);
                    stage(config, Stage::ReusingExistingAsset);
                    (metadata, path, true)
                }
                None => {
                    let pdf = download_pdf(&net, config, metadata).await?;
                    stage(config, Stage::UploadingPdf);
                    let path = host.upload_asset(pdf.bytes, &pdf.file_name).await?;
                    info!("Uploaded {} to {}", pdf.file_name, path);
                    (pdf.metadata, path, false)
                }
            };

            InsertOutcome {
                mode,
                metadata,
                inserted: with_trailing_newline(&format!("[{file_name}]({asset_path})")),
                source: None,
                asset_path: Some(asset_path),
                reused_asset,
            }
        }
    };

    stage(config, Stage::Inserting);
    host.insert_markdown(&outcome.inserted).await?;
    Ok(outcome)
}

/// A listing failure only costs the dedup.
async fn find_existing_asset(host: &dyn NoteHost, dir: &str, file_name: &str) -> Option<String> {
    match host.list_assets(dir).await {
        Ok(entries) => entries
            .into_iter()
            .find(|e| !e.is_dir && e.name == file_name)
            .map(|e| e.path),
        Err(e) => {
            warn!("Could not list existing assets: {}", e);
            None
        }
    }
}

fn stage(config: &ConversionConfig, stage: Stage) {
    if let Some(ref cb) = config.progress_callback {
        cb.on_stage(stage);
    }
}

fn with_trailing_newline(markdown: &str) -> String {
    if markdown.ends_with('\n') {
        markdown.to_string()
    } else {
        format!("{markdown}\n")
    }
}

// ── Kernel HTTP host ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct KernelEnvelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadData {
    #[serde(default)]
    err_files: Vec<String>,
    #[serde(default)]
    succ_map: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirEntry {
    name: String,
    #[serde(default)]
    is_dir: bool,
}

/// Host backed by the kernel's HTTP API.
#[derive(Clone)]
pub struct KernelHost {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    parent_id: Option<String>,
}

impl std::fmt::Debug for KernelHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHost")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("parent_id", &self.parent_id)
            .finish()
    }
}

impl KernelHost {
    /// `token` may be pasted with its `Token ` prefix.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: Option<&str>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            token: token.and_then(crate::config::normalize_token),
            parent_id: None,
        }
    }

    /// Block new content is appended to. Insertion is unavailable without it.
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        let id = parent_id.into().trim().to_string();
        self.parent_id = (!id.is_empty()).then_some(id);
        self
    }

    /// Forwarding-proxy settings pointing at this kernel.
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::new(self.base_url.clone(), self.token.as_deref())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        what: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, Arxiv2MdError> {
        let request = match &self.token {
            Some(token) => request.header("Authorization", format!("Token {token}")),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| Arxiv2MdError::Host(format!("{what}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Arxiv2MdError::Host(format!("{what}: HTTP {}", status.as_u16())));
        }
        let envelope: KernelEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Arxiv2MdError::Host(format!("{what}: invalid response: {e}")))?;
        if envelope.code != 0 {
            let msg = envelope
                .msg
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("code {}", envelope.code));
            return Err(Arxiv2MdError::Host(format!("{what}: {msg}")));
        }
        Ok(envelope.data)
    }
}

#[async_trait]
impl NoteHost for KernelHost {
    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            insert_markdown: self.parent_id.is_some(),
            upload_asset: true,
            list_assets: true,
        }
    }

    async fn insert_markdown(&self, markdown: &str) -> Result<(), Arxiv2MdError> {
        let Some(parent_id) = &self.parent_id else {
            return Err(Arxiv2MdError::HostCapability {
                missing: "markdown insertion (no parent block id)".into(),
            });
        };
        let body = json!({
            "dataType": "markdown",
            "data": markdown,
            "parentID": parent_id,
        });
        self.send::<serde_json::Value>("append block", self.http.post(self.url("/api/block/appendBlock")).json(&body))
            .await?;
        Ok(())
    }

    async fn upload_asset(&self, bytes: Vec<u8>, file_name: &str) -> Result<String, Arxiv2MdError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| Arxiv2MdError::Internal(format!("multipart: {e}")))?;
        let form = Form::new().text("assetsDirPath", ASSETS_DIR).part("file[]", part);

        let data: UploadData = self
            .send("upload asset", self.http.post(self.url("/api/asset/upload")).multipart(form))
            .await?
            .unwrap_or_default();
        if !data.err_files.is_empty() {
            return Err(Arxiv2MdError::Host(format!(
                "upload asset: rejected {}",
                data.err_files.join(", ")
            )));
        }
        if let Some(path) = data.succ_map.get(file_name) {
            return Ok(path.clone());
        }
        data.succ_map
            .into_values()
            .next()
            .ok_or_else(|| Arxiv2MdError::Host("upload asset: no stored path returned".into()))
    }

    async fn list_assets(&self, dir: &str) -> Result<Vec<AssetEntry>, Arxiv2MdError> {
        let dir = format!("/{}/", dir.trim_matches('/'));
        let entries: Vec<DirEntry> = self
            .send(
                "read asset directory",
                self.http
                    .post(self.url("/api/file/readDir"))
                    .json(&json!({ "path": format!("{WORKSPACE_DATA_DIR}{dir}") })),
            )
            .await?
            .unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|e| AssetEntry {
                path: format!("{dir}{}", e.name),
                name: e.name,
                is_dir: e.is_dir,
            })
            .collect())
    }
}
