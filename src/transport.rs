//! HTTP transport used by feed sessions and feed search.
//!
//! The ingestion core never talks to reqwest directly. It goes through the
//! [`Transport`] trait so callers can share one connection pool between
//! sessions, and tests can substitute scripted responses.
//!
//! Bodies are returned as raw bytes. Decoding belongs to whoever reads them:
//! feeds declare their own encoding, search responses are JSON.

use crate::config::Config;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use std::io::Read;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Default cap on a response body (10MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Errors produced while fetching a resource.
///
/// The ingestion core passes these through untouched; it never retries.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Reading the body of a blocking response failed
    #[error("Failed to read response body: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(err)
        }
    }
}

/// A GET request as seen by a [`Transport`].
#[derive(Clone, Copy)]
pub struct Request<'a> {
    pub url: &'a str,
    pub bearer: Option<&'a SecretString>,
}

impl<'a> Request<'a> {
    pub fn get(url: &'a str) -> Self {
        Self { url, bearer: None }
    }

    /// Attaches an `Authorization: Bearer` token.
    pub fn with_bearer(mut self, token: Option<&'a SecretString>) -> Self {
        self.bearer = token;
        self
    }
}

impl std::fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("bearer", &self.bearer.map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A successful response: the undecoded body and its `Content-Type`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchOutput {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Fetches resources over the network.
///
/// Both methods must produce the same result for the same request; the only
/// difference is whether the caller is suspended as a future or blocked.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: Request<'_>) -> Result<FetchOutput, TransportError>;

    /// Blocking counterpart of [`Transport::fetch`].
    ///
    /// Must not be called from within an async runtime.
    fn fetch_blocking(&self, request: Request<'_>) -> Result<FetchOutput, TransportError>;
}

fn content_type(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_body_bytes: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("feedmill/", env!("CARGO_PKG_VERSION")).to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl From<&Config> for TransportSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            user_agent: config.user_agent.clone(),
            max_body_bytes: config.max_feed_bytes,
        }
    }
}

/// reqwest-backed [`Transport`].
///
/// The async client is built eagerly. The blocking client spins up its own
/// runtime thread, so it is only built on the first blocking request.
pub struct HttpTransport {
    client: reqwest::Client,
    blocking: OnceLock<reqwest::blocking::Client>,
    settings: TransportSettings,
}

impl HttpTransport {
    pub fn new(settings: TransportSettings) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            blocking: OnceLock::new(),
            settings,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        Self::new(TransportSettings::from(config))
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, TransportError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(self.settings.timeout)
            .user_agent(self.settings.user_agent.clone())
            .build()?;
        Ok(self.blocking.get_or_init(|| client))
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: Request<'_>) -> Result<FetchOutput, TransportError> {
        tracing::debug!(url = %request.url, "GET");

        let mut builder = self.client.get(request.url);
        if let Some(token) = request.bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;

        if !response.status().is_success() {
            tracing::debug!(url = %request.url, status = %response.status(), "Non-success response");
            return Err(TransportError::HttpStatus(response.status().as_u16()));
        }

        let content_type = content_type(response.headers());
        let bytes = read_limited_bytes(response, self.settings.max_body_bytes).await?;
        Ok(FetchOutput {
            bytes,
            content_type,
        })
    }

    fn fetch_blocking(&self, request: Request<'_>) -> Result<FetchOutput, TransportError> {
        tracing::debug!(url = %request.url, "GET (blocking)");

        let mut builder = self.blocking_client()?.get(request.url);
        if let Some(token) = request.bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().map_err(TransportError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(TransportError::HttpStatus(response.status().as_u16()));
        }

        let content_type = content_type(response.headers());
        let limit = self.settings.max_body_bytes;
        if let Some(len) = response.content_length() {
            if len > limit as u64 {
                return Err(TransportError::ResponseTooLarge(limit));
            }
        }

        // Read one byte past the limit so an oversized body is detectable
        let mut bytes = Vec::new();
        response
            .take(limit as u64 + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }

        Ok(FetchOutput {
            bytes,
            content_type,
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(TransportError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::from_reqwest)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// In-memory transport for unit tests: answers every request from a queue.
#[cfg(test)]
pub(crate) mod scripted {
    use super::{FetchOutput, Request, Transport, TransportError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<FetchOutput, u16>>>,
        requested: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                requested: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn respond(self, body: &str) -> Self {
            self.respond_with(FetchOutput::new(body))
        }

        pub(crate) fn respond_with(self, output: FetchOutput) -> Self {
            self.responses.lock().unwrap().push_back(Ok(output));
            self
        }

        pub(crate) fn fail(self, status: u16) -> Self {
            self.responses.lock().unwrap().push_back(Err(status));
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }

        fn next(&self, request: Request<'_>) -> Result<FetchOutput, TransportError> {
            self.requested.lock().unwrap().push(request.url.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(output)) => Ok(output),
                Some(Err(status)) => Err(TransportError::HttpStatus(status)),
                None => Err(TransportError::HttpStatus(404)),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(&self, request: Request<'_>) -> Result<FetchOutput, TransportError> {
            self.next(request)
        }

        fn fetch_blocking(&self, request: Request<'_>) -> Result<FetchOutput, TransportError> {
            self.next(request)
        }
    }
}
