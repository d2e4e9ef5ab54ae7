//! Request and response snapshots exchanged between the network and the cache

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

/// An intercepted request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Create a bodiless GET request
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// URL path used for strategy classification
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Key an entry is stored under: method plus URL without fragment
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        format!("{} {}", self.method, url)
    }

    /// Only GET requests are ever written to a namespace
    pub fn has_cacheable_method(&self) -> bool {
        self.method == Method::GET
    }
}

/// Whether a response came from the network or stands in for a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Basic,
    Error,
}

/// Immutable snapshot of a response body, status and headers
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub kind: ResponseKind,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL after redirects, if known
    pub url: Option<Url>,
    pub redirected: bool,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            kind: ResponseKind::Basic,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            url: None,
            redirected: false,
        }
    }

    /// Synthetic response handed back when neither network nor cache can answer
    pub fn network_error() -> Self {
        Self {
            kind: ResponseKind::Error,
            status: StatusCode::BAD_GATEWAY,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            url: None,
            redirected: false,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_redirected(mut self, redirected: bool) -> Self {
        self.redirected = redirected;
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    /// A real network response with a 2xx status
    pub fn is_ok(&self) -> bool {
        !self.is_error() && self.status.is_success()
    }

    /// Redirected or error responses must never be stored
    pub fn is_cacheable(&self) -> bool {
        self.is_ok() && !self.redirected
    }
}
