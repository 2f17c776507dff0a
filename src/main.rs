use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feed_harvester::browser::{BrowserContext, ChromiumBrowser};
use feed_harvester::config::Config;
use feed_harvester::entities::{posts_from_raw, Author, Post};
use feed_harvester::harvester::target::{PostRef, SearchQuery};
use feed_harvester::harvester::{AuthorPostsOptions, Harvester, RepliesOptions};

const USAGE: &str = "usage: feed-harvester <command> <arg>

commands:
  posts <handle>               posts from an account's timeline
  search <query> [from-handle] latest search results
  detail <id|url>              a single post
  replies <id|url>             replies under a post
  user <handle>                an account";

/// One invocation of the binary.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Posts(String),
    Search { text: String, from: Option<String> },
    Detail(PostRef),
    Replies(PostRef),
    User(String),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let (Some(command), Some(arg)) = (args.first(), args.get(1)) else {
            bail!("{USAGE}");
        };
        Ok(match command.as_str() {
            "posts" => Self::Posts(arg.clone()),
            "search" => Self::Search {
                text: arg.clone(),
                from: args.get(2).cloned(),
            },
            "detail" => Self::Detail(PostRef::parse(arg)),
            "replies" => Self::Replies(PostRef::parse(arg)),
            "user" => Self::User(arg.clone()),
            other => bail!("unknown command {other:?}\n\n{USAGE}"),
        })
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(?command, "Starting feed-harvester");

    let browser = ChromiumBrowser::launch(&config.browser_settings())
        .await
        .context("Failed to launch browser")?;
    let mut harvester = Harvester::new(browser, config.harvest_settings());

    let outcome = tokio::select! {
        result = execute(&mut harvester, &config, command) => Some(result),
        () = shutdown_signal() => None,
    };

    if let Err(e) = harvester.close().await {
        warn!(error = %e, "Failed to close browser");
    }

    let Some(output) = outcome else {
        info!("Interrupted");
        return Ok(());
    };
    let output = output?;
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize output")?
    );
    Ok(())
}

async fn execute<B: BrowserContext>(
    harvester: &mut Harvester<B>,
    config: &Config,
    command: Command,
) -> Result<Value> {
    let offset = config.report_offset()?;
    let output = match command {
        Command::Posts(handle) => {
            let options = AuthorPostsOptions {
                pages: config.page_cap,
                count: config.result_cap,
                window: config.date_window()?,
            };
            let records = harvester
                .fetch_author_posts(&handle, &options)
                .await
                .with_context(|| format!("Failed to fetch posts of {handle}"))?;
            serde_json::to_value(localize(posts_from_raw(&records), offset))?
        }
        Command::Search { text, from } => {
            let (since, until) = config.search_bounds();
            let query = SearchQuery {
                from_handle: from,
                since,
                until,
                include_replies: config.include_replies,
                ..SearchQuery::new(text)
            };
            let records = harvester
                .fetch_search_timeline(&query, config.page_cap)
                .await
                .with_context(|| format!("Failed to search {:?}", query.to_query_string()))?;
            let mut posts = posts_from_raw(&records);
            if let Some(cap) = config.result_cap {
                posts.truncate(cap);
            }
            serde_json::to_value(localize(posts, offset))?
        }
        Command::Detail(post) => {
            let record = harvester
                .fetch_post_detail(&post)
                .await
                .with_context(|| format!("Failed to fetch post {post}"))?;
            let mut post = Post::from_raw(&record);
            post.created = post.created_in(offset);
            serde_json::to_value(post)?
        }
        Command::Replies(post) => {
            let options = RepliesOptions {
                pages: config.page_cap,
                count: config.result_cap,
                expand_replies: config.expand_replies,
                expand_additional: config.expand_additional,
            };
            let records = harvester
                .fetch_post_replies(&post, &options)
                .await
                .with_context(|| format!("Failed to fetch replies to {post}"))?;
            serde_json::to_value(localize(posts_from_raw(&records), offset))?
        }
        Command::User(handle) => {
            let record = harvester
                .resolve_author(&handle)
                .await
                .with_context(|| format!("Failed to resolve {handle}"))?;
            match record {
                Some(record) => serde_json::to_value(Author::from_raw(&record))?,
                None => {
                    warn!(%handle, "Account not found");
                    Value::Null
                }
            }
        }
    };
    Ok(output)
}

/// Express post creation times in the reporting offset.
fn localize(posts: Vec<Post>, offset: FixedOffset) -> Vec<Post> {
    posts
        .into_iter()
        .map(|mut post| {
            post.created = post.created_in(offset);
            post
        })
        .collect()
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,feed_harvester=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    // Logs go to stderr; stdout carries the JSON output
    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
