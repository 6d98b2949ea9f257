use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth;
use crate::config;
use crate::data::{FeedSource, ProxyClient, ProxyClientConfig, SearchSource};
use crate::proxy::ProxyServer;
use crate::reddit::{Gateway, GatewayConfig};
use crate::ui::{FeedView, SearchBox};

const DEFAULT_LOG_FILTER: &str = "subfeed=info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Serve,
    Feed { subreddit: String, pages: usize },
    Search { query: String },
}

pub fn run(command: Command) -> Result<()> {
    init_logging()?;
    let cfg = load_config()?;
    match command {
        Command::Serve => serve(&cfg),
        Command::Feed { subreddit, pages } => print_feed(&cfg, &subreddit, pages),
        Command::Search { query } => print_search(&cfg, &query),
    }
}

/// `RUST_LOG` wins; otherwise only this crate logs, at info. Output goes to
/// stderr so the listing commands keep stdout clean.
pub fn init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!("initialize logging: {}", err))
}

pub fn load_config() -> Result<config::Config> {
    let config_file = config::default_path();
    if let Some(path) = config_file.as_ref() {
        info!(path = %friendly_path(path), "config file");
    }
    config::load(config::LoadOptions {
        config_file,
        env_prefix: None,
        legacy_env: true,
    })
    .context("load config")
}

/// Token cache plus gateway, shared by every proxy worker.
pub fn build_gateway(cfg: &config::Config) -> Result<Arc<Gateway>> {
    let reddit = &cfg.reddit;
    if reddit.client_id.trim().is_empty() || reddit.client_secret.trim().is_empty() {
        tracing::warn!("reddit client credentials are not configured; upstream calls will fail");
    }
    let tokens = auth::TokenCache::new(auth::Config {
        client_id: reddit.client_id.clone(),
        client_secret: reddit.client_secret.clone(),
        user_agent: reddit.user_agent.clone(),
        token_url: reddit.token_url.clone(),
        refresh_skew: reddit.refresh_skew,
        timeout: reddit.request_timeout,
    })
    .context("create token cache")?;
    let gateway = Gateway::new(
        Arc::new(tokens),
        GatewayConfig {
            user_agent: reddit.user_agent.clone(),
            base_url: Some(reddit.api_base_url.clone()),
            timeout: Some(reddit.request_timeout),
        },
    )
    .context("create upstream gateway")?;
    Ok(Arc::new(gateway))
}

pub fn proxy_client(cfg: &config::Config) -> Result<ProxyClient> {
    ProxyClient::new(ProxyClientConfig {
        base_url: cfg.client.proxy_url.clone(),
        timeout: cfg.client.request_timeout,
        user_agent: format!("subfeed/{}", crate::VERSION),
    })
    .context("create proxy client")
}

fn serve(cfg: &config::Config) -> Result<()> {
    let gateway = build_gateway(cfg)?;
    let server = ProxyServer::bind(&cfg.server.listen_addr, gateway, cfg.server.workers)
        .context("start proxy")?;
    println!("subfeed proxy listening on {}", server.base_url());
    server.join();
    Ok(())
}

fn print_feed(cfg: &config::Config, subreddit: &str, pages: usize) -> Result<()> {
    let client = proxy_client(cfg)?;
    let mut view = FeedView::new(Arc::new(FeedSource::new(client)));
    let patience = cfg.client.request_timeout + Duration::from_secs(1);

    view.open(subreddit);
    view.wait(patience);
    for _ in 1..pages.max(1) {
        // Scroll the last post fully into view.
        let Some(sentinel) = view.trigger().bound().map(str::to_string) else {
            break;
        };
        if !view.on_sentinel_visible(&sentinel, 1.0) {
            break;
        }
        view.wait(patience);
    }

    if let Some(err) = view.state().error() {
        if view.posts().is_empty() {
            bail!("r/{}: {}", view.subreddit(), err.user_message());
        }
    }
    println!("r/{}", view.subreddit());
    for post in view.posts() {
        println!(
            "{:>6}  {}  ({} comments, u/{})",
            post.vote_count, post.title, post.num_comments, post.author
        );
        if !post.url.is_empty() {
            println!("        {}", post.url);
        }
    }
    if let Some(line) = view.status_line() {
        eprintln!("{}", line);
    }
    Ok(())
}

fn print_search(cfg: &config::Config, query: &str) -> Result<()> {
    let client = proxy_client(cfg)?;
    let mut search = SearchBox::new(
        Arc::new(SearchSource::new(client)),
        cfg.client.search_debounce,
    );

    search.input(query, Instant::now());
    while let Some(deadline) = search.next_deadline() {
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        search.tick(Instant::now());
    }
    search.wait(cfg.client.request_timeout + Duration::from_secs(1));

    for sub in search.results() {
        println!("r/{:<24} {:>10} subscribers  {}", sub.name, sub.subscribers, sub.description);
    }
    if let Some(line) = search.status_line() {
        eprintln!("{}", line);
    }
    if let Some(err) = search.state().error() {
        bail!("search {:?}: {}", query, err.user_message());
    }
    Ok(())
}

fn friendly_path(path: &std::path::Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            let mut display = String::from("~");
            if !stripped.as_os_str().is_empty() {
                display.push_str(&format!("/{}", stripped.display()));
            }
            return display;
        }
    }
    path.display().to_string()
}
