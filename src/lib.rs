//! feedmill: fetch RSS 2.0, RSS 1.0 (RDF) and Atom feeds and read them
//! through one article model.
//!
//! - [`feed`]: XML parsing, dialect detection, extraction and [`FeedSession`]
//! - [`search`]: feed discovery via a search index
//! - [`transport`]: the HTTP seam shared by both
//! - [`config`]: TOML configuration

pub mod config;
pub mod feed;
pub mod search;
pub mod transport;
pub mod util;

pub use config::{Config, ConfigError};
pub use feed::{Article, Dialect, FeedError, FeedSession, UpdatePolicy};
pub use search::{to_feed_url, FeedSearch, SearchError, SearchResult};
pub use transport::{FetchOutput, HttpTransport, Transport, TransportError, TransportSettings};
