//! Network access layer.
//!
//! ```text
//!                  ┌──────────────┐
//!   fetch_binary ─▶│ FetchPolicy  │
//!                  └──────┬───────┘
//!          Direct ────────┼──────── Restricted
//!            │            │            │
//!          direct      mirror ──▶ direct ──▶ forwarding proxy
//!                     (pdf only)              (endpoint chain)
//! ```
//!
//! Channels are tried strictly in order through [`fallback::first_success`];
//! a channel that does not apply to the URL (the mirror for non-PDF URLs, the
//! proxy when none is configured) is skipped without counting as a failure.

pub mod codec;
pub mod fallback;
pub mod proxy;

use crate::config::{ConversionConfig, FetchPolicy};
use crate::error::Arxiv2MdError;
use fallback::{first_success, FallbackError, Outcome, Strategy};
use proxy::{ForwardProxyClient, ForwardProxyPayload};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Proxy timeout for binary downloads.
pub const PROXY_DOWNLOAD_TIMEOUT_MS: u64 = 15_000;

const USER_AGENT: &str = concat!("arxiv2md/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP state for one conversion.
#[derive(Clone)]
pub struct NetworkClient {
    http: reqwest::Client,
    policy: FetchPolicy,
    proxy: Option<ForwardProxyClient>,
    mirror_pdf_base: String,
    timeout: Duration,
}

impl NetworkClient {
    pub fn new(config: &ConversionConfig) -> Result<Self, Arxiv2MdError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Arxiv2MdError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self::with_client(http, config))
    }

    /// Reuse an existing `reqwest::Client` (connection pool included).
    pub fn with_client(http: reqwest::Client, config: &ConversionConfig) -> Self {
        let proxy = config
            .proxy
            .clone()
            .map(|p| ForwardProxyClient::new(http.clone(), p));
        Self {
            http,
            policy: config.fetch_policy,
            proxy,
            mirror_pdf_base: config.endpoints.mirror_pdf_base.clone(),
            timeout: Duration::from_secs(config.download_timeout_secs),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn proxy(&self) -> Option<&ForwardProxyClient> {
        self.proxy.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Download `url` as bytes through the channels the policy allows.
    pub async fn fetch_binary(&self, url: &str) -> Result<Vec<u8>, Arxiv2MdError> {
        if self.policy == FetchPolicy::Direct {
            return self.fetch_direct(url).await;
        }

        let strategies = vec![
            Strategy::new("mirror", async move {
                match mirror_url(url, &self.mirror_pdf_base) {
                    Some(mirror) => {
                        debug!("Trying mirror {}", mirror);
                        Outcome::from(self.fetch_direct(&mirror).await.map(Some))
                    }
                    None => Outcome::NotApplicable,
                }
            }),
            Strategy::new("direct", async move { Outcome::from(self.fetch_direct(url).await.map(Some)) }),
            Strategy::new("proxy", async move { Outcome::from(self.fetch_via_proxy(url).await) }),
        ];

        match first_success(strategies).await {
            Ok((channel, bytes)) => {
                info!("Fetched {} via {} ({} bytes)", url, channel, bytes.len());
                Ok(bytes)
            }
            Err(FallbackError::Fatal(e)) => Err(e),
            Err(FallbackError::Exhausted(ex)) => Err(Arxiv2MdError::AllChannelsFailed {
                url: url.to_string(),
                detail: ex.summary(),
            }),
        }
    }

    /// Plain GET. A non-2xx status or an empty body is a failure.
    pub async fn fetch_direct(&self, url: &str) -> Result<Vec<u8>, Arxiv2MdError> {
        let failed = |reason: String| Arxiv2MdError::DownloadFailed {
            url: url.to_string(),
            reason,
        };
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    failed(format!("timed out after {}s", self.timeout.as_secs()))
                } else {
                    failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status.as_u16())));
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(failed("empty response body".into()));
        }
        Ok(bytes.to_vec())
    }

    /// `Ok(None)` when no proxy is configured.
    /// Download through the forwarding proxy; `Ok(None)` when none is
    /// configured.
    pub async fn fetch_via_proxy(&self, url: &str) -> Result<Option<Vec<u8>>, Arxiv2MdError> {
        let Some(proxy) = &self.proxy else {
            return Ok(None);
        };
        let payload = ForwardProxyPayload::get(url)
            .timeout_ms(PROXY_DOWNLOAD_TIMEOUT_MS)
            .response_encoding("base64");
        let data = proxy.forward(&payload).await?;
        data.binary().map(Some)
    }
}

/// Rewrite an arXiv PDF URL onto the cross-origin friendly mirror.
///
/// Returns `None` when the URL is not an `arxiv.org` PDF URL.
///
/// ```
/// use arxiv2md::net::mirror_url;
/// assert_eq!(
///     mirror_url("https://arxiv.org//pdf/2301.12345v2.pdf?x=1", "https://export.arxiv.org/pdf").as_deref(),
///     Some("https://export.arxiv.org/pdf/2301.12345v2?x=1")
/// );
/// assert_eq!(
///     mirror_url("https://arxiv.org/pdf/2301.12345v2.PDF", "https://export.arxiv.org/pdf").as_deref(),
///     Some("https://export.arxiv.org/pdf/2301.12345v2")
/// );
/// assert_eq!(mirror_url("https://example.com/pdf/1.pdf", "https://export.arxiv.org/pdf"), None);
/// ```
pub fn mirror_url(url: &str, mirror_base: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if !host.ends_with("arxiv.org") {
        return None;
    }

    let mut path = parsed.path().to_string();
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    let rest = path.strip_prefix("/pdf/")?;
    let id = match rest.len().checked_sub(4).and_then(|at| rest.split_at_checked(at)) {
        Some((id, ext)) if ext.eq_ignore_ascii_case(".pdf") => id,
        _ => rest,
    };
    if id.is_empty() {
        return None;
    }

    let query = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
    Some(format!("{}/{}{}", mirror_base.trim_end_matches('/'), id, query))
}
