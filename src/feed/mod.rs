//! Feed ingestion for RSS 2.0, RSS 1.0 (RDF) and Atom.
//!
//! - **Decoding**: [`decode`] resolves a body's character encoding
//! - **Parsing**: [`xml`] folds the quick-xml event stream into an owned tree
//! - **Detection**: [`dialect`] picks the dialect strategy for a document
//! - **Extraction**: [`article`] turns item/entry elements into [`Article`]s
//! - **Sessions**: [`session`] fetches, parses and commits a feed's state
//!
//! # Example
//!
//! ```ignore
//! use feedmill::feed::{Dialect, FeedSession};
//!
//! let mut session = FeedSession::new(transport, "https://example.com/rss", Dialect::Infer);
//! session.refresh().await?;
//! for article in session.articles() {
//!     println!("{}: {}", article.title(), article.link());
//! }
//! ```

pub mod article;
pub mod decode;
pub mod dialect;
pub mod session;
pub mod xml;

pub use article::{article_from_container, Article, ExtraFields};
pub use decode::decode_feed;
pub use dialect::{detect, feed_property, Dialect, FormatError};
pub use session::{
    keeps_previous_articles, parse_feed, FeedError, FeedSession, ParsedFeed, SessionState,
    UpdatePolicy,
};
pub use xml::{XmlDocument, XmlElement, XmlError};
