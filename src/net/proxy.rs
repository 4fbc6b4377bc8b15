//! Forwarding-proxy channel: the host application performs the request
//! server-side and hands back a JSON envelope.
//!
//! ```text
//! POST <host><endpoint>
//!   {url, method, timeout, headers:[{name,value}], contentType,
//!    payload, payloadEncoding, responseEncoding}
//! ← {code, msg, data:{status, contentType, body, bodyEncoding}}
//! ```
//!
//! Two endpoints are tried in order. On each endpoint an optional realtime
//! channel goes first and plain HTTP second; when both fail, the realtime
//! error rides along as context on the HTTP error.

use crate::config::ProxyConfig;
use crate::error::Arxiv2MdError;
use crate::net::codec::decode_base64;
use crate::net::fallback::{first_success, FallbackError, Outcome, Strategy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Endpoints tried in order.
pub const DEFAULT_PROXY_ENDPOINTS: [&str; 2] = ["/api/network/forwardProxy", "/api/system/proxy"];

/// One request header in the proxy envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyHeader {
    pub name: String,
    pub value: String,
}

/// Request envelope sent to the forwarding proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardProxyPayload {
    pub url: String,
    pub method: String,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<ProxyHeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_encoding: Option<String>,
}

impl ForwardProxyPayload {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            ..Default::default()
        }
    }

    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        Self {
            url: url.into(),
            method: "POST".into(),
            content_type: Some("application/json".into()),
            payload: Some(body.to_string()),
            payload_encoding: Some("text".into()),
            ..Default::default()
        }
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Some(ms);
        self
    }

    /// Append a header; empty values are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if !value.is_empty() {
            self.headers.push(ProxyHeader {
                name: name.into(),
                value: value.into(),
            });
        }
        self
    }

    pub fn response_encoding(mut self, encoding: &str) -> Self {
        self.response_encoding = Some(encoding.into());
        self
    }
}

/// Upstream response carried inside the proxy envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardProxyData {
    pub status: u16,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub body_encoding: Option<String>,
}

impl ForwardProxyData {
    fn encoding(&self) -> String {
        self.body_encoding
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    /// Body bytes. The proxy must have been asked for base64.
    pub fn binary(&self) -> Result<Vec<u8>, Arxiv2MdError> {
        let encoding = self.encoding();
        if !encoding.starts_with("base64") {
            return Err(Arxiv2MdError::ProxyEncoding {
                encoding: self
                    .body_encoding
                    .clone()
                    .unwrap_or_else(|| "text".into()),
            });
        }
        match self.body.as_deref() {
            Some(body) if !body.is_empty() => decode_base64(body),
            _ => Err(Arxiv2MdError::ProxyRequest("empty response body".into())),
        }
    }

    /// Body as text, decoding base64 when needed.
    pub fn text(&self) -> Result<String, Arxiv2MdError> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| Arxiv2MdError::ProxyRequest("response has no body".into()))?;
        let encoding = self.encoding();
        if encoding.is_empty() || encoding == "text" || encoding == "utf-8" {
            return Ok(body.to_string());
        }
        if encoding.starts_with("base64") {
            let bytes = decode_base64(body)?;
            return Ok(String::from_utf8_lossy(&bytes).into_owned());
        }
        Err(Arxiv2MdError::ProxyEncoding {
            encoding: self.body_encoding.clone().unwrap_or_default(),
        })
    }

    /// Reject non-2xx upstream statuses, surfacing the body as detail.
    fn ensure_success(self) -> Result<Self, Arxiv2MdError> {
        if (200..300).contains(&self.status) {
            return Ok(self);
        }
        if self.status == 401 {
            return Err(Arxiv2MdError::ProxyUnauthorized);
        }
        let detail = match self.text() {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("Could not decode proxy error body: {}", e);
                String::new()
            }
        };
        Err(Arxiv2MdError::ProxyStatus {
            status: self.status,
            detail,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ForwardProxyData>,
}

/// Low-level channel to the host that bypasses plain HTTP (for example a
/// websocket the host keeps open). Returns the raw JSON answer.
#[async_trait]
pub trait RealtimeProxyChannel: Send + Sync {
    async fn call(&self, endpoint: &str, payload: &ForwardProxyPayload) -> Result<Value, Arxiv2MdError>;
}

/// Accepts either the full `{code, msg, data}` envelope or bare `data`.
fn parse_proxy_value(value: Value) -> Result<ForwardProxyData, Arxiv2MdError> {
    if value.get("code").is_some() {
        let envelope: ProxyEnvelope = serde_json::from_value(value)
            .map_err(|e| Arxiv2MdError::ProxyRequest(format!("malformed envelope: {e}")))?;
        return unwrap_envelope(envelope);
    }
    serde_json::from_value(value)
        .map_err(|e| Arxiv2MdError::ProxyRequest(format!("malformed response: {e}")))
}

fn unwrap_envelope(envelope: ProxyEnvelope) -> Result<ForwardProxyData, Arxiv2MdError> {
    if envelope.code != 0 {
        return Err(Arxiv2MdError::ProxyRequest(
            envelope
                .msg
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("code {}", envelope.code)),
        ));
    }
    envelope
        .data
        .ok_or_else(|| Arxiv2MdError::ProxyRequest(envelope.msg.unwrap_or_else(|| "response has no data".into())))
}

/// Client for the host's forwarding proxy.
#[derive(Clone)]
pub struct ForwardProxyClient {
    http: reqwest::Client,
    config: ProxyConfig,
}

impl ForwardProxyClient {
    pub fn new(http: reqwest::Client, config: ProxyConfig) -> Self {
        Self { http, config }
    }

    /// Send `payload` through the first endpoint that accepts it.
    ///
    /// The returned data always has a 2xx upstream status.
    pub async fn forward(&self, payload: &ForwardProxyPayload) -> Result<ForwardProxyData, Arxiv2MdError> {
        debug!("Forwarding {} {} through host proxy", payload.method, payload.url);
        let strategies = self
            .config
            .endpoints
            .iter()
            .map(|endpoint| {
                Strategy::new(endpoint.clone(), async move {
                    match self.request_endpoint(endpoint, payload).await {
                        Ok(data) => Outcome::Success(data),
                        Err(e) => Outcome::Failed(e),
                    }
                })
            })
            .collect();

        match first_success(strategies).await {
            Ok((_, data)) => Ok(data),
            Err(FallbackError::Fatal(e)) => Err(e),
            Err(FallbackError::Exhausted(ex)) => {
                // A single unauthorised answer is more useful verbatim.
                if ex.errors.iter().all(|e| matches!(e, Arxiv2MdError::ProxyUnauthorized)) && ex.has_failures() {
                    return Err(Arxiv2MdError::ProxyUnauthorized);
                }
                Err(Arxiv2MdError::ProxyRequest(ex.summary()))
            }
        }
    }

    async fn request_endpoint(
        &self,
        endpoint: &str,
        payload: &ForwardProxyPayload,
    ) -> Result<ForwardProxyData, Arxiv2MdError> {
        let realtime_error = match &self.config.realtime {
            Some(channel) => match channel.call(endpoint, payload).await.and_then(parse_proxy_value) {
                Ok(data) => return data.ensure_success(),
                Err(e) => {
                    warn!("Realtime proxy channel failed on {}, falling back to HTTP: {}", endpoint, e);
                    Some(e)
                }
            },
            None => None,
        };

        self.request_http(endpoint, payload).await.map_err(|e| match realtime_error {
            Some(rt) if !matches!(e, Arxiv2MdError::ProxyUnauthorized) => {
                Arxiv2MdError::ProxyRequest(format!("{e} (realtime channel: {rt})"))
            }
            _ => e,
        })
    }

    async fn request_http(
        &self,
        endpoint: &str,
        payload: &ForwardProxyPayload,
    ) -> Result<ForwardProxyData, Arxiv2MdError> {
        let url = format!(
            "{}/{}",
            self.config.host_base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        let mut request = self.http.post(&url).json(payload);
        if let Some(token) = &self.config.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Token {token}"));
        }
        // The host's own deadline plus slack for the envelope round trip.
        if let Some(ms) = payload.timeout {
            request = request.timeout(Duration::from_millis(ms) + Duration::from_secs(5));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Arxiv2MdError::ProxyRequest(e.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Arxiv2MdError::ProxyUnauthorized);
        }
        if !status.is_success() {
            return Err(Arxiv2MdError::ProxyRequest(format!("HTTP {}", status.as_u16())));
        }

        let envelope: ProxyEnvelope = response
            .json()
            .await
            .map_err(|e| Arxiv2MdError::ProxyRequest(format!("malformed envelope: {e}")))?;
        unwrap_envelope(envelope)?.ensure_success()
    }
}
