use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedmill::feed::{Dialect, FeedSession, UpdatePolicy};
use feedmill::search::{to_feed_url, FeedSearch, SearchResult};
use feedmill::transport::{HttpTransport, Transport};
use feedmill::util::{one_line, sanitize_for_terminal};
use feedmill::Config;
use std::path::PathBuf;
use std::sync::Arc;

/// Get the config directory path (~/.config/feedmill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmill"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedmill",
    about = "Read RSS 2.0, RSS 1.0 and Atom feeds, or search for new ones"
)]
struct Args {
    /// Config file (defaults to ~/.config/feedmill/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a feed and print its articles
    View {
        /// Feed URL
        url: String,

        /// Feed dialect: rss2, rss1, atom or infer
        #[arg(long, default_value_t = Dialect::Infer)]
        dialect: Dialect,

        /// Fetch with the blocking client instead of the async one
        #[arg(long)]
        blocking: bool,
    },
    /// Search for feeds
    Search {
        /// Search term (defaults to "tech")
        #[arg(default_value = "")]
        term: String,

        /// Maximum number of results
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print the raw results as JSON
        #[arg(long)]
        json: bool,

        /// Open the result at this index (0-based) as a feed
        #[arg(long, value_name = "INDEX")]
        open: Option<usize>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    Config::load(&path).with_context(|| format!("Failed to load config: {}", path.display()))
}

fn print_session(session: &FeedSession) {
    println!("{}", sanitize_for_terminal(&one_line(session.title())));
    if !session.description().is_empty() {
        println!("{}", sanitize_for_terminal(&one_line(session.description())));
    }
    println!(
        "{} ({})",
        sanitize_for_terminal(session.url()),
        session.dialect()
    );
    println!();

    for article in session.articles() {
        println!("- {}", sanitize_for_terminal(&one_line(article.title())));
        if !article.description().is_empty() {
            println!("  {}", sanitize_for_terminal(&one_line(article.description())));
        }
        if !article.link().is_empty() {
            println!("  {}", sanitize_for_terminal(article.link()));
        }
    }
}

fn print_results(results: &[SearchResult]) {
    for (index, result) in results.iter().enumerate() {
        let title = result.title.as_deref().unwrap_or("(untitled)");
        println!("[{}] {}", index, sanitize_for_terminal(&one_line(title)));
        if let Some(description) = result.description.as_deref() {
            println!("    {}", sanitize_for_terminal(&one_line(description)));
        }
        match to_feed_url(result) {
            Ok(url) => println!("    {}", sanitize_for_terminal(&url)),
            Err(e) => println!("    ({})", e),
        }
    }
}

async fn view(config: &Config, url: String, dialect: Dialect, blocking: bool) -> Result<()> {
    let policy = UpdatePolicy::from_config(config);

    if blocking {
        // The blocking client owns a runtime of its own and must be built and
        // dropped off the async worker threads.
        let config = config.clone();
        return tokio::task::spawn_blocking(move || -> Result<()> {
            let transport: Arc<dyn Transport> = Arc::new(
                HttpTransport::from_config(&config).context("Failed to build HTTP client")?,
            );
            let mut session =
                FeedSession::new(transport, url, dialect).with_update_policy(policy);
            session
                .refresh_blocking()
                .with_context(|| format!("Failed to refresh feed: {}", session.url()))?;
            print_session(&session);
            Ok(())
        })
        .await
        .context("Blocking refresh task panicked")?;
    }

    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::from_config(config).context("Failed to build HTTP client")?);
    let mut session = FeedSession::new(transport, url, dialect).with_update_policy(policy);
    session
        .refresh()
        .await
        .with_context(|| format!("Failed to refresh feed: {}", session.url()))?;
    print_session(&session);
    Ok(())
}

async fn search(
    config: &Config,
    term: &str,
    limit: usize,
    json: bool,
    open: Option<usize>,
) -> Result<()> {
    let transport: Arc<dyn Transport> =
        Arc::new(HttpTransport::from_config(config).context("Failed to build HTTP client")?);
    let searcher = FeedSearch::from_config(transport, config);

    let results = searcher
        .search(term, limit)
        .await
        .context("Feed search failed")?;

    if let Some(index) = open {
        let result = results.get(index).with_context(|| {
            format!("No result at index {} ({} results)", index, results.len())
        })?;
        let session = searcher
            .open_result(result)
            .await
            .context("Failed to open search result")?;
        print_session(&session);
        return Ok(());
    }

    if json {
        let output =
            serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
        println!("{}", output);
    } else if results.is_empty() {
        eprintln!("No feeds found");
    } else {
        print_results(&results);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(args.config)?;

    match args.command {
        Command::View {
            url,
            dialect,
            blocking,
        } => view(&config, url, dialect, blocking).await,
        Command::Search {
            term,
            limit,
            json,
            open,
        } => search(&config, &term, limit, json, open).await,
    }
}
