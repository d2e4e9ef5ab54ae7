//! Werehouse origin client

use async_trait::async_trait;
use http::HeaderMap;
use http::header::HeaderName;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;
use werehouse_storage::{FetchRequest, FetchResponse};

use crate::error::ProxyError;
use crate::fetcher::Fetcher;

/// Headers that describe a single connection and must not be forwarded
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// Origin client configuration
#[derive(Clone, Debug)]
pub struct OriginClientConfig {
    /// Base URL of the Werehouse origin
    pub url: Url,
    /// Skip TLS certificate verification
    pub skip_tls_verify: bool,
    /// User-Agent sent with every request
    pub user_agent: Option<String>,
}

/// HTTP client for the Werehouse origin
pub struct OriginClient {
    config: OriginClientConfig,
    client: Client,
}

impl OriginClient {
    /// Create a new origin client
    pub fn new(config: OriginClientConfig) -> Result<Self, ProxyError> {
        let mut builder = Client::builder();

        if config.skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ref user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build()?;

        info!("Created origin client for {}", config.url);

        Ok(Self { config, client })
    }

    /// Base URL of the origin
    pub fn origin(&self) -> &Url {
        &self.config.url
    }

    /// Resolve a path (with optional query) against the origin
    pub fn resolve(&self, path_and_query: &str) -> Result<Url, ProxyError> {
        Ok(self.config.url.join(path_and_query)?)
    }

    /// Check if the origin is reachable
    pub async fn ping(&self) -> Result<bool, ProxyError> {
        let response = self.client.get(self.config.url.clone()).send().await?;
        Ok(!response.status().is_server_error())
    }
}

/// Copy headers, leaving out hop-by-hop ones
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

#[async_trait]
impl Fetcher for OriginClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProxyError> {
        debug!("Fetching {} {}", request.method, request.url);

        let mut requested = request.url.clone();
        requested.set_fragment(None);

        let mut builder = self
            .client
            .request(request.method.clone(), requested.clone())
            .headers(forwardable_headers(&request.headers));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;

        let status = response.status();
        let final_url = response.url().clone();
        let redirected = final_url != requested;
        let headers = forwardable_headers(response.headers());
        let body = response.bytes().await?;

        debug!(
            "Fetched {} -> {} ({} bytes{})",
            request.url,
            status,
            body.len(),
            if redirected { ", redirected" } else { "" }
        );

        let mut fetched = FetchResponse::new(status, body)
            .with_url(final_url)
            .with_redirected(redirected);
        fetched.headers = headers;
        Ok(fetched)
    }
}
