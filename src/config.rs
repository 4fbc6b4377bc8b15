//! Configuration types for arXiv-to-Markdown conversion.
//!
//! All pipeline behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The config is an immutable snapshot:
//! the pipeline only ever borrows it, so one config can serve many papers.
//!
//! Engine selection is the tagged [`Engine`] variant. LLM refinement and the
//! remote extraction service cannot both be active; the builder (and
//! [`Settings::engine`] for persisted boolean switches) rejects that
//! combination before any network call is made.
//!
//! [`Settings`] is the persisted, user-editable form of the same knobs. It
//! is loaded once, converted into a `ConversionConfig`, and only written back
//! through an explicit [`Settings::save`].

use crate::error::Arxiv2MdError;
use crate::net::proxy::{RealtimeProxyChannel, DEFAULT_PROXY_ENDPOINTS};
use crate::pipeline::llm::MarkdownRefiner;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

// ── Defaults ─────────────────────────────────────────────────────────────

pub const DEFAULT_LLM_MODEL: &str = "deepseek-chat";
pub const DEFAULT_LLM_PATH: &str = "/chat/completions";
pub const DEFAULT_EXTRACTION_BASE_URL: &str = "https://mineru.net";
pub const DEFAULT_EXTRACTION_PATH: &str = "/api/v4/extract/task";

/// Upper bound on concurrent section refinements.
pub const MAX_LLM_CONCURRENCY: usize = 32;

/// Configuration for one conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use arxiv2md::{ConversionConfig, LlmConfig};
///
/// let config = ConversionConfig::builder()
///     .omit_references(true)
///     .llm(LlmConfig::new("https://api.deepseek.com", "sk-..."))
///     .build()
///     .unwrap();
/// assert!(config.engine.is_llm());
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Leave the references block out of the output. Default: false.
    pub omit_references: bool,

    /// Post-processing engine. Default: [`Engine::None`].
    pub engine: Engine,

    /// Which network channels are allowed. Default: [`FetchPolicy::Direct`].
    pub fetch_policy: FetchPolicy,

    /// arXiv endpoints. Overridable so tests can target a mock server.
    pub endpoints: ArxivEndpoints,

    /// Headings and labels used for compression blocks.
    pub labels: Labels,

    /// Maximum in-flight section refinements. Range: 1–32. Default: 32.
    pub llm_concurrency: usize,

    /// Per-section LLM timeout in seconds. Default: 240.
    pub section_timeout_secs: u64,

    /// Full-document LLM timeout in seconds. Default: 480.
    pub full_input_timeout_secs: u64,

    /// Delay between extraction-service status polls. Default: 4000 ms.
    pub extraction_poll_interval_ms: u64,

    /// Ceiling for an extraction task to finish. Default: 600 s.
    pub extraction_timeout_secs: u64,

    /// Timeout for direct downloads (metadata, HTML, archives, PDF). Default: 120 s.
    pub download_timeout_secs: u64,

    /// Host forwarding proxy, used when direct access fails or is not allowed.
    pub proxy: Option<ProxyConfig>,

    /// Pre-constructed refiner. Takes precedence over the chat client that
    /// would otherwise be built from [`Engine::Llm`].
    pub refiner: Option<Arc<dyn MarkdownRefiner>>,

    /// Progress events for stage changes and refinement.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            omit_references: false,
            engine: Engine::None,
            fetch_policy: FetchPolicy::Direct,
            endpoints: ArxivEndpoints::default(),
            labels: Labels::default(),
            llm_concurrency: MAX_LLM_CONCURRENCY,
            section_timeout_secs: 240,
            full_input_timeout_secs: 480,
            extraction_poll_interval_ms: 4000,
            extraction_timeout_secs: 600,
            download_timeout_secs: 120,
            proxy: None,
            refiner: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("omit_references", &self.omit_references)
            .field("engine", &self.engine)
            .field("fetch_policy", &self.fetch_policy)
            .field("endpoints", &self.endpoints)
            .field("llm_concurrency", &self.llm_concurrency)
            .field("section_timeout_secs", &self.section_timeout_secs)
            .field("full_input_timeout_secs", &self.full_input_timeout_secs)
            .field("extraction_poll_interval_ms", &self.extraction_poll_interval_ms)
            .field("extraction_timeout_secs", &self.extraction_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("proxy", &self.proxy)
            .field("refiner", &self.refiner.as_ref().map(|_| "<dyn MarkdownRefiner>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
            llm: None,
            extraction: None,
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
    llm: Option<LlmConfig>,
    extraction: Option<ExtractionServiceConfig>,
}

impl ConversionConfigBuilder {
    pub fn omit_references(mut self, v: bool) -> Self {
        self.config.omit_references = v;
        self
    }

    /// Enable LLM refinement.
    pub fn llm(mut self, llm: LlmConfig) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Enable the remote extraction service.
    pub fn extraction_service(mut self, service: ExtractionServiceConfig) -> Self {
        self.extraction = Some(service);
        self
    }

    /// Set the engine directly (already validated elsewhere, e.g. from [`Settings::engine`]).
    pub fn engine(mut self, engine: Engine) -> Self {
        match engine {
            Engine::None => {
                self.llm = None;
                self.extraction = None;
            }
            Engine::Llm(llm) => self.llm = Some(llm),
            Engine::ExtractionService(svc) => self.extraction = Some(svc),
        }
        self
    }

    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.config.fetch_policy = policy;
        self
    }

    pub fn endpoints(mut self, endpoints: ArxivEndpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn labels(mut self, labels: Labels) -> Self {
        self.config.labels = labels;
        self
    }

    pub fn llm_concurrency(mut self, n: usize) -> Self {
        self.config.llm_concurrency = n;
        self
    }

    pub fn section_timeout_secs(mut self, secs: u64) -> Self {
        self.config.section_timeout_secs = secs;
        self
    }

    pub fn full_input_timeout_secs(mut self, secs: u64) -> Self {
        self.config.full_input_timeout_secs = secs;
        self
    }

    pub fn extraction_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.extraction_poll_interval_ms = ms;
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn refiner(mut self, refiner: Arc<dyn MarkdownRefiner>) -> Self {
        self.config.refiner = Some(refiner);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Arxiv2MdError> {
        let mut config = self.config;
        config.engine = match (self.llm, self.extraction) {
            (Some(_), Some(_)) => {
                return Err(Arxiv2MdError::InvalidConfig(
                    "LLM refinement and the extraction service are mutually exclusive; enable only one"
                        .into(),
                ))
            }
            (Some(llm), None) => {
                llm.validate()?;
                Engine::Llm(llm)
            }
            (None, Some(svc)) => {
                svc.validate()?;
                Engine::ExtractionService(svc)
            }
            (None, None) => Engine::None,
        };

        if config.llm_concurrency == 0 || config.llm_concurrency > MAX_LLM_CONCURRENCY {
            return Err(Arxiv2MdError::InvalidConfig(format!(
                "LLM concurrency must be 1–{MAX_LLM_CONCURRENCY}, got {}",
                config.llm_concurrency
            )));
        }
        if config.section_timeout_secs == 0
            || config.full_input_timeout_secs == 0
            || config.extraction_timeout_secs == 0
            || config.download_timeout_secs == 0
        {
            return Err(Arxiv2MdError::InvalidConfig("Timeouts must be ≥ 1s".into()));
        }
        if config.extraction_poll_interval_ms == 0 {
            return Err(Arxiv2MdError::InvalidConfig(
                "Extraction poll interval must be ≥ 1ms".into(),
            ));
        }
        if config.fetch_policy == FetchPolicy::Restricted && config.proxy.is_none() {
            warn!("Restricted fetch policy without a forwarding proxy; only mirror and direct channels are available");
        }
        Ok(config)
    }
}

// ── Engines ──────────────────────────────────────────────────────────────

/// Post-processing engine applied to the fetched document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Engine {
    /// Plain conversion, no refinement.
    #[default]
    None,
    /// Refine converted Markdown through an OpenAI-compatible chat endpoint.
    Llm(LlmConfig),
    /// Let a remote extraction service produce the Markdown from the PDF.
    ExtractionService(ExtractionServiceConfig),
}

impl Engine {
    pub fn is_llm(&self) -> bool {
        matches!(self, Engine::Llm(_))
    }

    pub fn is_extraction_service(&self) -> bool {
        matches!(self, Engine::ExtractionService(_))
    }
}

/// OpenAI-compatible chat endpoint used for refinement.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    /// Relative path appended to `base_url`, or an absolute URL used as-is.
    pub api_path: String,
    pub api_key: String,
    pub model: String,
    /// Send the whole document in one call instead of section by section.
    pub full_input: bool,
}

impl LlmConfig {
    /// Endpoint with the default path and model.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_path: DEFAULT_LLM_PATH.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_LLM_MODEL.to_string(),
            full_input: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_path(mut self, path: impl Into<String>) -> Self {
        self.api_path = path.into();
        self
    }

    pub fn with_full_input(mut self, v: bool) -> Self {
        self.full_input = v;
        self
    }

    fn validate(&self) -> Result<(), Arxiv2MdError> {
        let mut missing = Vec::new();
        if self.api_path.trim().is_empty() {
            missing.push("API path");
        }
        if self.base_url.trim().is_empty() && !is_absolute_url(&self.api_path) {
            missing.push("base URL");
        }
        if self.api_key.trim().is_empty() {
            missing.push("API key");
        }
        if self.model.trim().is_empty() {
            missing.push("model");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Arxiv2MdError::InvalidConfig(format!(
                "LLM configuration is missing: {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("full_input", &self.full_input)
            .finish()
    }
}

/// Remote document-extraction service settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionServiceConfig {
    pub base_url: String,
    /// Relative task path, or an absolute URL used as-is.
    pub api_path: String,
    pub api_key: String,
    pub language: Option<String>,
    pub enable_formula: bool,
    pub enable_table: bool,
    pub is_ocr: bool,
    pub model_version: Option<String>,
}

impl ExtractionServiceConfig {
    /// Service at the default base URL and task path.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_EXTRACTION_BASE_URL.to_string(),
            api_path: DEFAULT_EXTRACTION_PATH.to_string(),
            api_key: api_key.into(),
            language: None,
            enable_formula: true,
            enable_table: true,
            is_ocr: false,
            model_version: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn validate(&self) -> Result<(), Arxiv2MdError> {
        let mut missing = Vec::new();
        if self.api_path.trim().is_empty() {
            missing.push("API path");
        }
        if self.base_url.trim().is_empty() && !is_absolute_url(&self.api_path) {
            missing.push("base URL");
        }
        if self.api_key.trim().is_empty() {
            missing.push("API key");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Arxiv2MdError::InvalidConfig(format!(
                "Extraction service configuration is missing: {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for ExtractionServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_path", &self.api_path)
            .field("api_key", &redact(&self.api_key))
            .field("language", &self.language)
            .field("enable_formula", &self.enable_formula)
            .field("enable_table", &self.enable_table)
            .field("is_ocr", &self.is_ocr)
            .field("model_version", &self.model_version)
            .finish()
    }
}

// ── Network ──────────────────────────────────────────────────────────────

/// Which channels the network layer may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchPolicy {
    /// Unrestricted context: direct requests only.
    #[default]
    Direct,
    /// Cross-origin-restricted context: mirror, then direct, then the
    /// forwarding proxy.
    Restricted,
}

/// The host application's forwarding proxy.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Base URL of the host kernel, e.g. `http://127.0.0.1:6806`.
    pub host_base_url: String,
    /// Workspace API token, already normalised (see [`normalize_token`]).
    pub token: Option<String>,
    /// Endpoints tried in order.
    pub endpoints: Vec<String>,
    /// Lower-level channel tried before plain HTTP on each endpoint.
    pub realtime: Option<Arc<dyn RealtimeProxyChannel>>,
}

impl ProxyConfig {
    pub fn new(host_base_url: impl Into<String>, token: Option<&str>) -> Self {
        Self {
            host_base_url: host_base_url.into(),
            token: token.and_then(normalize_token),
            endpoints: DEFAULT_PROXY_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            realtime: None,
        }
    }

    pub fn with_realtime(mut self, channel: Arc<dyn RealtimeProxyChannel>) -> Self {
        self.realtime = Some(channel);
        self
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host_base_url", &self.host_base_url)
            .field("token", &self.token.as_deref().map(redact))
            .field("endpoints", &self.endpoints)
            .field("realtime", &self.realtime.as_ref().map(|_| "<dyn RealtimeProxyChannel>"))
            .finish()
    }
}

/// arXiv service locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArxivEndpoints {
    /// Atom query API.
    pub metadata_api: String,
    /// HTML rendering root; papers live at `<html_base>/<versioned id>`.
    pub html_base: String,
    /// PDF root; papers live at `<pdf_base>/<versioned id>.pdf`.
    pub pdf_base: String,
    /// LaTeX source root.
    pub src_base: String,
    /// E-print root, the last archive candidate.
    pub eprint_base: String,
    /// Cross-origin friendly PDF mirror root.
    pub mirror_pdf_base: String,
}

impl Default for ArxivEndpoints {
    fn default() -> Self {
        Self {
            metadata_api: "https://export.arxiv.org/api/query".into(),
            html_base: "https://arxiv.org/html".into(),
            pdf_base: "https://arxiv.org/pdf".into(),
            src_base: "https://arxiv.org/src".into(),
            eprint_base: "https://arxiv.org/e-print".into(),
            mirror_pdf_base: "https://export.arxiv.org/pdf".into(),
        }
    }
}

impl ArxivEndpoints {
    /// Every endpoint rooted at `base`. Used to point the pipeline at a
    /// local server.
    pub fn rooted_at(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            metadata_api: format!("{base}/api/query"),
            html_base: format!("{base}/html"),
            pdf_base: format!("{base}/pdf"),
            src_base: format!("{base}/src"),
            eprint_base: format!("{base}/e-print"),
            mirror_pdf_base: format!("{base}/mirror/pdf"),
        }
    }
}

// ── Labels ───────────────────────────────────────────────────────────────

/// Text used for compression-block headings and their first lines.
///
/// Headings double as protected section names for the refinement stage,
/// so a localised label set is still recognised as "do not rewrite".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    pub heading_authors: String,
    pub heading_references: String,
    pub heading_acknowledgements: String,
    pub label_authors: String,
    pub label_references: String,
    pub label_acknowledgements: String,
    /// Alt text for images converted from `\includegraphics`.
    pub figure: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            heading_authors: "Authors".into(),
            heading_references: "References".into(),
            heading_acknowledgements: "Acknowledgements".into(),
            label_authors: "Authors".into(),
            label_references: "References".into(),
            label_acknowledgements: "Acknowledgements".into(),
            figure: "Figure".into(),
        }
    }
}

// ── Persisted settings ───────────────────────────────────────────────────

/// User-editable settings, persisted as JSON.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Workspace API token for the host's forwarding proxy and kernel API.
    pub workspace_token: String,
    /// Convert the full text instead of attaching the PDF.
    pub full_text: bool,
    pub omit_references: bool,
    pub llm: LlmSettings,
    pub extraction: ExtractionSettings,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_path: String,
    pub api_key: String,
    pub model: String,
    pub full_input: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_path: DEFAULT_LLM_PATH.into(),
            api_key: String::new(),
            model: DEFAULT_LLM_MODEL.into(),
            full_input: false,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtractionSettings {
    pub enabled: bool,
    pub base_url: String,
    pub api_path: String,
    pub api_key: String,
    pub language: String,
    pub model_version: String,
    pub is_ocr: bool,
    pub enable_formula: bool,
    pub enable_table: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: DEFAULT_EXTRACTION_BASE_URL.into(),
            api_path: DEFAULT_EXTRACTION_PATH.into(),
            api_key: String::new(),
            language: String::new(),
            model_version: String::new(),
            is_ocr: false,
            enable_formula: true,
            enable_table: true,
        }
    }
}

impl Settings {
    /// Load settings from `path`.
    ///
    /// A missing file yields defaults. A file that cannot be parsed is
    /// logged and also yields defaults, so a corrupt settings file never
    /// blocks a conversion.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Arxiv2MdError> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Arxiv2MdError::InvalidConfig(format!(
                    "cannot read settings '{}': {e}",
                    path.display()
                )))
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Persist settings to `path` atomically (temp file + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Arxiv2MdError> {
        let path = path.as_ref();
        let write_err = |source| Arxiv2MdError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Arxiv2MdError::Internal(format!("serialise settings: {e}")))?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(write_err)?;
        std::fs::rename(&tmp_path, path).map_err(write_err)?;
        Ok(())
    }

    /// Turn the two persisted switches into one [`Engine`].
    ///
    /// Blank fields fall back to the defaults before validation.
    pub fn engine(&self) -> Result<Engine, Arxiv2MdError> {
        match (self.llm.enabled, self.extraction.enabled) {
            (true, true) => Err(Arxiv2MdError::InvalidConfig(
                "LLM refinement and the extraction service are mutually exclusive; enable only one"
                    .into(),
            )),
            (true, false) => {
                let llm = LlmConfig {
                    base_url: self.llm.base_url.trim().to_string(),
                    api_path: non_blank_or(&self.llm.api_path, DEFAULT_LLM_PATH),
                    api_key: self.llm.api_key.trim().to_string(),
                    model: non_blank_or(&self.llm.model, DEFAULT_LLM_MODEL),
                    full_input: self.llm.full_input,
                };
                llm.validate()?;
                Ok(Engine::Llm(llm))
            }
            (false, true) => {
                let svc = ExtractionServiceConfig {
                    base_url: non_blank_or(&self.extraction.base_url, DEFAULT_EXTRACTION_BASE_URL),
                    api_path: non_blank_or(&self.extraction.api_path, DEFAULT_EXTRACTION_PATH),
                    api_key: self.extraction.api_key.trim().to_string(),
                    language: non_blank(&self.extraction.language),
                    enable_formula: self.extraction.enable_formula,
                    enable_table: self.extraction.enable_table,
                    is_ocr: self.extraction.is_ocr,
                    model_version: non_blank(&self.extraction.model_version),
                };
                svc.validate()?;
                Ok(Engine::ExtractionService(svc))
            }
            (false, false) => Ok(Engine::None),
        }
    }

    /// Normalised workspace token, if any.
    pub fn token(&self) -> Option<String> {
        normalize_token(&self.workspace_token)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("workspace_token", &redact(&self.workspace_token))
            .field("full_text", &self.full_text)
            .field("omit_references", &self.omit_references)
            .field("llm.enabled", &self.llm.enabled)
            .field("llm.base_url", &self.llm.base_url)
            .field("llm.model", &self.llm.model)
            .field("llm.api_key", &redact(&self.llm.api_key))
            .field("extraction.enabled", &self.extraction.enabled)
            .field("extraction.base_url", &self.extraction.base_url)
            .field("extraction.api_key", &redact(&self.extraction.api_key))
            .finish()
    }
}

/// Default settings location: `<config dir>/arxiv2md/settings.json`.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("arxiv2md").join("settings.json"))
}

/// Strip a pasted `Token ` prefix and surrounding whitespace.
///
/// ```
/// use arxiv2md::config::normalize_token;
/// assert_eq!(normalize_token(" Token abc123 ").as_deref(), Some("abc123"));
/// assert_eq!(normalize_token("   "), None);
/// ```
pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = match trimmed.get(..5) {
        Some(prefix)
            if prefix.eq_ignore_ascii_case("token")
                && trimmed[5..].chars().next().map_or(true, char::is_whitespace) =>
        {
            trimmed[5..].trim()
        }
        _ => trimmed,
    };
    (!stripped.is_empty()).then(|| stripped.to_string())
}

pub(crate) fn is_absolute_url(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("http://") || s.starts_with("https://")
}

/// Absolute `api_path` wins; otherwise `base_url` + `/path`, with a blank
/// path replaced by `default_path`.
pub(crate) fn resolve_endpoint(base_url: &str, api_path: &str, default_path: &str) -> String {
    let path = api_path.trim();
    if is_absolute_url(path) {
        return path.to_string();
    }
    let path = if path.is_empty() { default_path } else { path };
    let base = base_url.trim().trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

fn non_blank(s: &str) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn non_blank_or(s: &str, default: &str) -> String {
    non_blank(s).unwrap_or_else(|| default.to_string())
}
