use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::canonical::{CanonicalPost, CanonicalSubreddit, Page};
use crate::error::GatewayError;
use crate::proxy::{ErrorBody, FeedResponse, SearchResponse};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Fetches one page of `Item`s for a target. The cursor is only meaningful for
/// the target it was issued for.
pub trait PageSource: Send + Sync {
    type Item;

    fn fetch_page(&self, target: &str, cursor: Option<&str>)
        -> Result<Page<Self::Item>, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct ProxyClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ProxyClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/".into(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("subfeed/{}", crate::VERSION),
        }
    }
}

/// Blocking client for the proxy's JSON routes.
#[derive(Clone)]
pub struct ProxyClient {
    http: Client,
    base_url: Url,
    user_agent: String,
}

impl ProxyClient {
    pub fn new(cfg: ProxyClientConfig) -> Result<Self, GatewayError> {
        let mut base = cfg.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|err| GatewayError::Transport(format!("build proxy client: {}", err)))?;
        Ok(Self {
            http,
            base_url,
            user_agent: cfg.user_agent,
        })
    }

    pub fn search_subreddits(
        &self,
        query: &str,
        after: Option<&str>,
    ) -> Result<Page<CanonicalSubreddit>, GatewayError> {
        let mut params = vec![("q", query.to_string()), ("page", "1".to_string())];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }
        let resp: SearchResponse = self.get("reddit/search", &params)?;
        Ok(Page {
            items: resp.subreddits,
            after: resp.after,
            before: resp.before,
        }
        .normalized())
    }

    pub fn subreddit_posts(
        &self,
        subreddit: &str,
        after: Option<&str>,
    ) -> Result<Page<CanonicalPost>, GatewayError> {
        let mut params = vec![("subreddit", subreddit.to_string())];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }
        let resp: FeedResponse = self.get("reddit/subreddit/posts", &params)?;
        Ok(Page {
            items: resp.posts,
            after: resp.after,
            before: resp.before,
        }
        .normalized())
    }

    pub fn post(&self, id: &str) -> Result<CanonicalPost, GatewayError> {
        self.get("reddit/post", &[("postId", id.to_string())])
    }

    fn get<T>(&self, path: &str, params: &[(&str, String)]) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
    {
        let mut url = self.base_url.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        debug!(path, "proxy request");

        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Rebuilds a gateway error from a proxy error reply, preferring `details`
/// over the generic `error` text.
fn error_from_body(status: u16, body: &str) -> GatewayError {
    let message = match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            details: Some(details),
            ..
        }) if !details.trim().is_empty() => details,
        Ok(ErrorBody { error, .. }) => error,
        Err(_) => body.to_string(),
    };
    match status {
        400 => GatewayError::Validation(message),
        404 => GatewayError::NotFound(message),
        _ => GatewayError::Upstream {
            status,
            body: message,
        },
    }
}

/// Subreddit directory search; the target is the query text.
pub struct SearchSource {
    client: ProxyClient,
}

impl SearchSource {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

impl PageSource for SearchSource {
    type Item = CanonicalSubreddit;

    fn fetch_page(
        &self,
        target: &str,
        cursor: Option<&str>,
    ) -> Result<Page<CanonicalSubreddit>, GatewayError> {
        self.client.search_subreddits(target, cursor)
    }
}

/// Hot feed of one subreddit; the target is the subreddit name.
pub struct FeedSource {
    client: ProxyClient,
}

impl FeedSource {
    pub fn new(client: ProxyClient) -> Self {
        Self { client }
    }
}

impl PageSource for FeedSource {
    type Item = CanonicalPost;

    fn fetch_page(
        &self,
        target: &str,
        cursor: Option<&str>,
    ) -> Result<Page<CanonicalPost>, GatewayError> {
        self.client.subreddit_posts(target, cursor)
    }
}
