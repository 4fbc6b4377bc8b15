//! Error types for the arxiv2md library.
//!
//! Every failure that reaches a caller is an [`Arxiv2MdError`]. Not every
//! error ends a run, though: the document-source chain swallows
//! infrastructure failures (logging them) and moves on to the next format,
//! while [`Arxiv2MdError::is_fatal`] marks the configuration errors that must
//! abort immediately, even inside a fallback chain.
//!
//! Messages are written for the end user. They are shown verbatim as the
//! status line of the CLI (or the host dialog), so several carry a hint.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the arxiv2md library.
#[derive(Debug, Error)]
pub enum Arxiv2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input is neither an arXiv identifier nor an arXiv URL.
    #[error("'{input}' is not an arXiv identifier or URL\nExamples: 2301.12345, hep-th/9901001, https://arxiv.org/abs/2301.12345v2")]
    InvalidIdentifier { input: String },

    // ── Metadata errors ───────────────────────────────────────────────────
    /// The metadata API answered with a non-2xx status or was unreachable.
    #[error("Failed to fetch arXiv metadata: {reason}")]
    MetadataFetch { reason: String },

    /// The metadata API answered with something that is not well-formed XML.
    #[error("Failed to parse arXiv metadata: {0}")]
    MetadataParse(String),

    /// The feed contained no `<entry>` for the requested identifier.
    #[error("No arXiv paper found for '{id}'")]
    PaperNotFound { id: String },

    /// The feed entry has no title.
    #[error("arXiv entry for '{id}' has no title")]
    MissingTitle { id: String },

    // ── Network errors ────────────────────────────────────────────────────
    /// A single download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Every network channel was tried and each one failed.
    #[error("Failed to download '{url}'. Tried: {detail}")]
    AllChannelsFailed { url: String, detail: String },

    /// The forwarding proxy reported an application-level failure.
    #[error("Forwarding proxy request failed: {0}")]
    ProxyRequest(String),

    /// The proxied request completed but the upstream status was not 2xx.
    #[error("Forwarding proxy returned HTTP {status}: {detail}")]
    ProxyStatus { status: u16, detail: String },

    /// The host rejected the proxy call for lack of credentials.
    #[error("Forwarding proxy rejected the request (401 Unauthorized)\nSet the workspace API token (--host-token) and try again.")]
    ProxyUnauthorized,

    /// The proxy response uses a body encoding that cannot be interpreted.
    #[error("Unsupported proxy body encoding '{encoding}'")]
    ProxyEncoding { encoding: String },

    // ── Document source errors ────────────────────────────────────────────
    /// The HTML rendering exists but could not be fetched.
    #[error("Failed to fetch arXiv HTML (HTTP {status})")]
    HtmlFetch { status: u16 },

    /// A source archive could not be unpacked.
    #[error("Failed to unpack archive: {0}")]
    Archive(String),

    /// No strategy produced Markdown for the paper.
    #[error("Full text is unavailable for arXiv:{id}\nNeither the HTML rendering nor the LaTeX source could be converted.")]
    FullTextUnavailable { id: String },

    // ── Extraction service errors ─────────────────────────────────────────
    /// The extraction service rejected a request or answered unexpectedly.
    #[error("Extraction service error: {0}")]
    ExtractionService(String),

    /// The remote task ended in the `failed` state.
    #[error("Extraction task failed: {0}")]
    ExtractionFailed(String),

    /// The remote task did not finish in time.
    #[error("Extraction task did not finish within {secs}s")]
    ExtractionTimeout { secs: u64 },

    /// The result bundle did not contain any Markdown.
    #[error("Extraction result contains no Markdown")]
    ExtractionNoMarkdown,

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The chat endpoint returned an error or could not be reached.
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    /// The chat endpoint answered 2xx without `choices[0].message.content`.
    #[error("LLM returned an invalid response (missing choices[0].message.content)")]
    LlmInvalidResponse,

    // ── Host errors ───────────────────────────────────────────────────────
    /// The host application does not offer a capability the mode needs.
    #[error("Host does not support: {missing}")]
    HostCapability { missing: String },

    /// A host API call failed.
    #[error("Host request failed: {0}")]
    Host(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output or settings file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or settings validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Arxiv2MdError {
    /// Errors that must stop the run even when a fallback is available.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Arxiv2MdError::InvalidConfig(_)
                | Arxiv2MdError::InvalidIdentifier { .. }
                | Arxiv2MdError::HostCapability { .. }
        )
    }
}
