//! Upstream transport seam
//!
//! The dispatcher talks to the upstream through the [`Upstream`] trait so
//! tests can script outcomes. The production implementation rides on
//! reqwest, with one cached client per outbound proxy.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reqwest::{Client, Method};
use tracing::debug;

use crate::error::{Result, RotorError};

/// One logical request to forward upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path and query, joined onto the configured base URL
    pub path: String,
    pub body: Bytes,
    pub content_type: Option<String>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: Bytes::new(),
            content_type: None,
        }
    }

    pub fn post_json(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: body.into(),
            content_type: Some("application/json".to_string()),
        }
    }
}

/// Upstream reply as seen by the dispatcher
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport used for one attempt. Implementations must be cancel-safe:
/// the dispatcher drops the future when the per-attempt timeout fires.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Issue the call with the given credential, optionally through a
    /// proxy identified by its connection URL.
    async fn send(
        &self,
        request: &UpstreamRequest,
        key: &str,
        proxy_url: Option<&str>,
    ) -> Result<UpstreamResponse>;
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL the request path is joined onto
    pub base_url: String,
    /// Header the credential is sent in
    pub auth_header: String,
    /// TCP connect timeout; the overall attempt timeout is the
    /// dispatcher's concern
    pub connect_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            auth_header: "x-api-key".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// reqwest-backed transport with a per-proxy client cache
pub struct HttpUpstream {
    config: UpstreamConfig,
    /// Keyed by proxy connection URL; empty string is the direct client.
    clients: DashMap<String, Client>,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    /// Get or build the client bound to the given proxy.
    fn client_for(&self, proxy_url: Option<&str>) -> Result<Client> {
        let cache_key = proxy_url.unwrap_or_default().to_string();
        if let Some(client) = self.clients.get(&cache_key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().connect_timeout(self.config.connect_timeout);
        if let Some(url) = proxy_url {
            let proxy = reqwest::Proxy::all(url)
                .map_err(|e| RotorError::Network(format!("invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| RotorError::Network(format!("client build failed: {e}")))?;

        debug!(via_proxy = proxy_url.is_some(), "upstream client built");
        self.clients.insert(cache_key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(
        &self,
        request: &UpstreamRequest,
        key: &str,
        proxy_url: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let client = self.client_for(proxy_url)?;
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        let mut builder = client
            .request(request.method.clone(), &url)
            .header(&self.config.auth_header, key)
            .body(request.body.clone());
        if let Some(content_type) = &request.content_type {
            builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(UpstreamResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RotorError {
    if e.is_timeout() {
        RotorError::Timeout
    } else {
        RotorError::Network(e.to_string())
    }
}
