use super::article::{extract_articles, Article};
use super::dialect::{detect, Dialect, FormatError};
use super::xml::{XmlDocument, XmlError};
use crate::config::Config;
use crate::transport::{FetchOutput, Request, Transport, TransportError};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while refreshing a feed session.
///
/// A failed refresh leaves the session exactly as it was.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Fetching the feed failed
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The body cannot be decoded or is not well-formed XML
    #[error("Malformed feed XML: {0}")]
    Parse(#[from] XmlError),
    /// The XML is not a feed of the requested dialect
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Whether a session has completed a refresh yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unrefreshed,
    Refreshed,
}

/// How a refresh commits a freshly extracted article list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Keep the cached list when the new first article equals the cached
    /// first article. See [`keeps_previous_articles`].
    #[default]
    SuppressUnchangedHead,
    /// Always take the new list.
    AlwaysReplace,
}

impl UpdatePolicy {
    /// Policy selected by the `suppress_unchanged_articles` config key.
    pub fn from_config(config: &Config) -> Self {
        if config.suppress_unchanged_articles {
            UpdatePolicy::SuppressUnchangedHead
        } else {
            UpdatePolicy::AlwaysReplace
        }
    }
}

/// The no-op suppression rule: keep `previous` when both lists are
/// non-empty and their first articles are structurally equal.
///
/// This assumes a feed's first item rarely stays the same while the rest
/// changes. When only later items change, the cached list goes stale.
pub fn keeps_previous_articles(previous: &[Article], fresh: &[Article]) -> bool {
    match (previous.first(), fresh.first()) {
        (Some(old), Some(new)) => old == new,
        _ => false,
    }
}

/// Everything one refresh extracts from a document, before commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub dialect: Dialect,
    pub title: String,
    pub description: String,
    pub articles: Vec<Article>,
}

/// Parses a feed body: decoding, XML, dialect detection, then extraction.
///
/// The encoding comes from a byte order mark or the XML declaration and
/// defaults to UTF-8. This is what a refresh does after fetching, minus the
/// `Content-Type` charset hint.
pub fn parse_feed(body: impl AsRef<[u8]>, requested: Dialect) -> Result<ParsedFeed, FeedError> {
    let doc = XmlDocument::from_bytes(body.as_ref(), None)?;
    read_feed(&doc, requested)
}

fn read_feed(doc: &XmlDocument, requested: Dialect) -> Result<ParsedFeed, FeedError> {
    let detected = detect(doc, requested)?;

    Ok(ParsedFeed {
        dialect: detected.dialect(),
        title: detected.property("title").trim().to_string(),
        description: detected.property("description").trim().to_string(),
        articles: extract_articles(&detected),
    })
}

/// A feed being followed: its URL, dialect, metadata and articles.
///
/// Refreshing takes `&mut self`, so a session cannot be refreshed twice at
/// once. Share one across tasks behind a mutex, which serializes refreshes.
pub struct FeedSession {
    transport: Arc<dyn Transport>,
    url: String,
    requested: Dialect,
    dialect: Dialect,
    title: String,
    description: String,
    articles: Vec<Article>,
    policy: UpdatePolicy,
    state: SessionState,
}

impl FeedSession {
    pub fn new(transport: Arc<dyn Transport>, url: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            transport,
            url: url.into(),
            requested: dialect,
            dialect,
            title: String::new(),
            description: String::new(),
            articles: Vec::new(),
            policy: UpdatePolicy::default(),
            state: SessionState::Unrefreshed,
        }
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Dialect resolved by the last refresh, or the requested one before
    /// the first refresh.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Dialect preference used by [`FeedSession::refresh`].
    pub fn requested_dialect(&self) -> Dialect {
        self.requested
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.policy
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Re-fetches the session's URL with its dialect preference.
    pub async fn refresh(&mut self) -> Result<(), FeedError> {
        let url = self.url.clone();
        self.refresh_from(&url, self.requested).await
    }

    /// Fetches `url` and replaces the session's state with what it contains.
    ///
    /// # Arguments
    ///
    /// * `url` - Feed to fetch; becomes the session's URL on success
    /// * `dialect` - Dialect preference; becomes [`FeedSession::requested_dialect`]
    ///   on success. [`Dialect::Infer`] detects the dialect from the document.
    ///
    /// # Behavior
    ///
    /// - URL, dialects, title and description are always replaced on success
    /// - Articles follow the session's [`UpdatePolicy`]
    /// - Nothing is retried
    ///
    /// # Errors
    ///
    /// The session is left exactly as it was when any of these is returned:
    /// - [`FeedError::Transport`] - The fetch failed
    /// - [`FeedError::Parse`] - The body cannot be decoded or is not well-formed XML
    /// - [`FeedError::Format`] - The document is not a feed of the requested dialect
    pub async fn refresh_from(&mut self, url: &str, dialect: Dialect) -> Result<(), FeedError> {
        let output = self.transport.fetch(Request::get(url)).await?;
        self.ingest(url, dialect, &output)
    }

    /// Blocking variant of [`FeedSession::refresh`].
    ///
    /// Must not be called from within an async runtime.
    pub fn refresh_blocking(&mut self) -> Result<(), FeedError> {
        let url = self.url.clone();
        self.refresh_blocking_from(&url, self.requested)
    }

    /// Blocking variant of [`FeedSession::refresh_from`].
    pub fn refresh_blocking_from(&mut self, url: &str, dialect: Dialect) -> Result<(), FeedError> {
        let output = self.transport.fetch_blocking(Request::get(url))?;
        self.ingest(url, dialect, &output)
    }

    fn ingest(&mut self, url: &str, dialect: Dialect, output: &FetchOutput) -> Result<(), FeedError> {
        let parsed = XmlDocument::from_bytes(&output.bytes, output.content_type.as_deref())
            .map_err(FeedError::from)
            .and_then(|doc| read_feed(&doc, dialect))
            .inspect_err(|e| {
                tracing::warn!(url = %url, error = %e, "Feed refresh rejected, keeping previous state");
            })?;
        self.commit(url, dialect, parsed);
        Ok(())
    }

    fn commit(&mut self, url: &str, requested: Dialect, parsed: ParsedFeed) {
        let ParsedFeed {
            dialect,
            title,
            description,
            articles,
        } = parsed;

        self.url = url.to_string();
        self.requested = requested;
        self.dialect = dialect;
        self.title = title;
        self.description = description;

        let keep = self.policy == UpdatePolicy::SuppressUnchangedHead
            && keeps_previous_articles(&self.articles, &articles);
        if keep {
            tracing::debug!(url = %url, "First article unchanged, keeping cached articles");
        } else {
            self.articles = articles;
        }
        self.state = SessionState::Refreshed;

        tracing::info!(
            url = %url,
            dialect = %dialect,
            articles = self.articles.len(),
            kept_previous = keep,
            "Feed refreshed"
        );
    }
}

impl std::fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSession")
            .field("url", &self.url)
            .field("requested", &self.requested)
            .field("dialect", &self.dialect)
            .field("title", &self.title)
            .field("articles", &self.articles.len())
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish()
    }
}
