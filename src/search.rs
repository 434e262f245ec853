//! Feed discovery through a search index (Feedly's feed search by default).
//!
//! A search returns [`SearchResult`] descriptors. [`to_feed_url`] turns one
//! into a feed URL, and [`FeedSearch::open_result`] goes one step further and
//! hands back a refreshed [`FeedSession`].

use crate::config::Config;
use crate::feed::{Dialect, FeedError, FeedSession};
use crate::transport::{Request, Transport, TransportError};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://cloud.feedly.com/v3/search/feeds/";

/// Term searched for when the caller passes a blank one.
pub const DEFAULT_SEARCH_TERM: &str = "tech";

pub const MIN_RESULTS: usize = 1;
pub const MAX_RESULTS: usize = 100_000;

/// Length of the `feed/` prefix on search result identifiers.
const FEED_ID_PREFIX_LEN: usize = 5;

/// Errors that can occur during a search or while opening a result.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Malformed search response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Search response has no \"results\" array")]
    MissingResults,

    #[error("Invalid search endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Search result has neither feedId nor id")]
    MissingIdentifier,

    #[error("Search result identifier '{0}' is shorter than its feed/ prefix")]
    ShortIdentifier(String),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// One entry of a search response, passed through as received.
///
/// Every field is optional. Fields this type does not name are kept in
/// [`SearchResult::extra`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchResult {
    /// Identifier of the form `feed/<url>`
    pub id: Option<String>,
    /// Same form as `id`; preferred when present
    pub feed_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Home page of the site behind the feed
    pub website: Option<String>,
    pub topics: Option<Vec<String>>,
    pub subscribers: Option<u64>,
    pub score: Option<f64>,
    /// Unix time in milliseconds
    pub last_updated: Option<f64>,
    pub estimated_engagement: Option<f64>,
    /// Two-letter language code
    pub language: Option<String>,
    pub cover_url: Option<String>,
    pub icon_url: Option<String>,
    pub visual_url: Option<String>,
    pub logo: Option<String>,
    /// How often the feed gets updated
    pub velocity: Option<f64>,
    /// Unix time in milliseconds
    pub updated: Option<f64>,
    /// Whether the syndication is partial
    pub partial: Option<bool>,
    pub related_layout: Option<String>,
    pub related_target: Option<String>,
    /// Accent color in hexadecimal
    pub accent_color: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Substitutes [`DEFAULT_SEARCH_TERM`] for a blank term.
pub fn effective_term(term: &str) -> &str {
    if term.trim().is_empty() {
        DEFAULT_SEARCH_TERM
    } else {
        term
    }
}

/// Clamps a requested result count to `[MIN_RESULTS, MAX_RESULTS]`.
pub fn clamp_results(max_results: usize) -> usize {
    max_results.clamp(MIN_RESULTS, MAX_RESULTS)
}

/// Derives the feed URL of a search result.
///
/// Takes `feedId`, falling back to `id`, and drops its first five characters
/// (the `feed/` prefix). No check is made that the prefix is really `feed/`.
/// An identifier shorter than five characters is an error.
pub fn to_feed_url(result: &SearchResult) -> Result<String, SearchError> {
    let id = result
        .feed_id
        .as_deref()
        .or(result.id.as_deref())
        .ok_or(SearchError::MissingIdentifier)?;

    if id.chars().count() < FEED_ID_PREFIX_LEN {
        return Err(SearchError::ShortIdentifier(id.to_string()));
    }
    Ok(id.chars().skip(FEED_ID_PREFIX_LEN).collect())
}

fn parse_results(body: &[u8]) -> Result<Vec<SearchResult>, SearchError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let results = value.get("results").ok_or(SearchError::MissingResults)?;
    Ok(Vec::<SearchResult>::deserialize(results)?)
}

/// Client for the feed search index.
pub struct FeedSearch {
    transport: Arc<dyn Transport>,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl FeedSearch {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            api_key: None,
        }
    }

    /// Endpoint and API key from `config`; the API key env var wins over the file.
    pub fn from_config(transport: Arc<dyn Transport>, config: &Config) -> Self {
        let search = Self::new(transport).with_endpoint(config.search_endpoint.clone());
        match config.resolved_search_api_key() {
            Some(key) => search.with_api_key(SecretString::from(key)),
            None => search,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sent as a bearer token with every search request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// URL a search for `term` requests, after defaulting and clamping.
    pub fn query_url(&self, term: &str, max_results: usize) -> Result<Url, SearchError> {
        let count = clamp_results(max_results).to_string();
        let url = Url::parse_with_params(
            &self.endpoint,
            [("n", count.as_str()), ("query", effective_term(term))],
        )?;
        Ok(url)
    }

    /// Searches the index for feeds matching `term`.
    ///
    /// # Arguments
    ///
    /// * `term` - Search text; blank or whitespace-only searches for
    ///   [`DEFAULT_SEARCH_TERM`]
    /// * `max_results` - Requested result count, clamped to
    ///   `[MIN_RESULTS, MAX_RESULTS]`
    ///
    /// # Returns
    ///
    /// The entries of the response's `results` array, in index order.
    ///
    /// # Errors
    ///
    /// - [`SearchError::InvalidEndpoint`] - The configured endpoint is not a URL
    /// - [`SearchError::Transport`] - The request failed or returned non-2xx
    /// - [`SearchError::Malformed`] - The body is not JSON, or `results` has the wrong shape
    /// - [`SearchError::MissingResults`] - The body has no `results` member
    ///
    /// Nothing is returned on failure; there are no partial results.
    pub async fn search(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = self.query_url(term, max_results)?;
        let output = self.transport.fetch(self.request(&url)).await?;
        self.finish(term, &output.bytes)
    }

    /// Blocking variant of [`FeedSearch::search`].
    ///
    /// Must not be called from within an async runtime.
    pub fn search_blocking(
        &self,
        term: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let url = self.query_url(term, max_results)?;
        let output = self.transport.fetch_blocking(self.request(&url))?;
        self.finish(term, &output.bytes)
    }

    /// Opens a search result as a feed session and refreshes it.
    pub async fn open_result(&self, result: &SearchResult) -> Result<FeedSession, SearchError> {
        let mut session = self.session_for(result)?;
        session.refresh().await?;
        Ok(session)
    }

    /// Blocking variant of [`FeedSearch::open_result`].
    pub fn open_result_blocking(&self, result: &SearchResult) -> Result<FeedSession, SearchError> {
        let mut session = self.session_for(result)?;
        session.refresh_blocking()?;
        Ok(session)
    }

    fn session_for(&self, result: &SearchResult) -> Result<FeedSession, SearchError> {
        let url = to_feed_url(result)?;
        tracing::debug!(url = %url, "Opening search result");
        Ok(FeedSession::new(
            Arc::clone(&self.transport),
            url,
            Dialect::Infer,
        ))
    }

    fn request<'a>(&'a self, url: &'a Url) -> Request<'a> {
        Request::get(url.as_str()).with_bearer(self.api_key.as_ref())
    }

    fn finish(&self, term: &str, body: &[u8]) -> Result<Vec<SearchResult>, SearchError> {
        let results = parse_results(body)?;
        tracing::info!(
            term = %effective_term(term),
            results = results.len(),
            "Feed search completed"
        );
        Ok(results)
    }
}

impl std::fmt::Debug for FeedSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSearch")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
