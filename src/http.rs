//! HTTP transport trait and the production `reqwest` implementation.
//!
//! Every network request in the pipeline (content API listings, page fetches,
//! asset downloads, robots.txt) goes through [`Transport`], so tests can swap
//! in the recording [`tests::MockTransport`] without touching a socket.
//!
//! The transport never interprets status codes. A 404 or 500 is a successful
//! `get` with that status; only connection-level problems (DNS, TLS, timeout)
//! are a [`TransportError`]. Callers decide what each status means.

use crate::config::SiteConfig;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("Request failed: {0}")]
    Failed(String),
}

/// A fully-read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// `Content-Type` header value, empty when absent.
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Blocking GET transport.
///
/// Must be `Sync` so one instance can be shared by every worker in a rayon pool.
pub trait Transport: Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by a `reqwest` blocking client.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a client with the configured timeout, user agent and, when a
    /// token is present, a Basic `Authorization` header on every request.
    pub fn new(config: &SiteConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&config.network.user_agent)?);
        if let Some(token) = &config.auth_token {
            let mut value = HeaderValue::from_str(&format!("Basic {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(config.network.request_timeout())
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self.client.get(url).send()?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes()?.to_vec();
        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
