use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::auth::{AccessToken, TokenCache};
use crate::canonical::{CanonicalPost, CanonicalSubreddit, Page};
use crate::error::GatewayError;

pub const DEFAULT_BASE_URL: &str = "https://oauth.reddit.com/";
pub const PAGE_SIZE: u32 = 10;

const RATE_LIMIT_FLOOR: f64 = 5.0;
const POPULAR: &str = "popular";

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct ListingOptions {
    pub after: Option<String>,
    pub limit: Option<u32>,
    pub extra: Vec<(String, String)>,
}

impl ListingOptions {
    fn page(after: Option<&str>) -> Self {
        Self {
            after: after
                .map(str::trim)
                .filter(|cursor| !cursor.is_empty())
                .map(str::to_string),
            limit: Some(PAGE_SIZE),
            extra: Vec::new(),
        }
    }

    fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        params.extend(self.extra);
        if let Some(limit) = self.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        if let Some(after) = self.after {
            params.push(("after".into(), after));
        }
        params
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimit {
    pub used: f64,
    pub remaining: f64,
    #[serde(skip)]
    pub reset_at: Option<SystemTime>,
}

/// Authenticated access to the upstream content API. Owns the token cache;
/// callers only ever see canonical records.
pub struct Gateway {
    tokens: Arc<TokenCache>,
    http: Client,
    user_agent: String,
    base_url: Url,
    rate: RwLock<RateLimit>,
}

impl Gateway {
    pub fn new(tokens: Arc<TokenCache>, config: GatewayConfig) -> Result<Self, GatewayError> {
        let user_agent = if config.user_agent.trim().is_empty() {
            format!("subfeed/{}", crate::VERSION)
        } else {
            config.user_agent
        };
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = Client::builder()
            .timeout(config.timeout.unwrap_or(Duration::from_secs(8)))
            .build()
            .map_err(|err| GatewayError::Transport(format!("build http client: {}", err)))?;

        Ok(Gateway {
            tokens,
            http,
            user_agent,
            base_url,
            rate: RwLock::new(RateLimit::default()),
        })
    }

    pub fn rate_limit(&self) -> RateLimit {
        self.rate.read().clone()
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    pub fn fetch_post_by_id(&self, id: &str) -> Result<CanonicalPost, GatewayError> {
        let id = id.trim().trim_start_matches("t3_");
        if id.is_empty() {
            return Err(GatewayError::Validation("Post ID is required".into()));
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(GatewayError::Validation("Invalid post ID".into()));
        }
        let path = format!("/by_id/t3_{}", id);
        let listing: Listing<Item> = self.fetch_listing(&path, ListingOptions::default())?;
        let item = listing
            .children
            .into_iter()
            .next()
            .and_then(|thing| thing.data)
            .ok_or_else(|| GatewayError::NotFound("Post not found".into()))?;
        Ok(CanonicalPost::from_item(&item))
    }

    pub fn search_subreddits(
        &self,
        query: &str,
        after: Option<&str>,
    ) -> Result<Page<CanonicalSubreddit>, GatewayError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GatewayError::Validation(
                "Query parameter is required".into(),
            ));
        }
        let mut opts = ListingOptions::page(after);
        opts.extra = vec![
            ("q".into(), query.to_string()),
            ("sort".into(), "relevance".into()),
        ];
        let listing: Listing<Item> = self.fetch_listing("/subreddits/search", opts)?;
        Ok(listing.into_page(CanonicalSubreddit::from_item))
    }

    pub fn list_subreddit_feed(
        &self,
        name: &str,
        after: Option<&str>,
    ) -> Result<Page<CanonicalPost>, GatewayError> {
        let name = normalize_subreddit_name(name);
        if name.is_empty() {
            return Err(GatewayError::Validation("Subreddit is required".into()));
        }
        if !is_valid_subreddit_name(name) {
            return Err(GatewayError::Validation("Invalid subreddit name".into()));
        }
        // The popular listing lists subreddits; its children are subreddit
        // shaped and go through the same post mapping.
        let path = if name.eq_ignore_ascii_case(POPULAR) {
            "/subreddits/popular".to_string()
        } else {
            format!("/r/{}/hot", name)
        };
        let listing: Listing<Item> = self.fetch_listing(&path, ListingOptions::page(after))?;
        Ok(listing.into_page(CanonicalPost::from_item))
    }

    fn fetch_listing<T>(&self, path: &str, opts: ListingOptions) -> Result<Listing<T>, GatewayError>
    where
        T: DeserializeOwned,
    {
        let params = opts.into_params();
        let resp = self.request(path, &params)?;
        let body = resp.text()?;
        let listing: ListingEnvelope<T> = serde_json::from_str(&body)?;
        Ok(listing.data)
    }

    /// Issues an authenticated GET. A 401 invalidates the token that was used
    /// and the request is repeated exactly once with a fresh one.
    fn request(&self, path: &str, params: &[(String, String)]) -> Result<Response, GatewayError> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }

        let token = self.tokens.get_token()?;
        let resp = self.send(&url, &token)?;
        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            warn!(path, "upstream rejected token, refreshing once");
            self.tokens.invalidate(&token);
            let token = self.tokens.get_token()?;
            self.send(&url, &token)?
        } else {
            resp
        };

        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().unwrap_or_default();
            warn!(path, status = status.as_u16(), "upstream request failed");
            Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn send(&self, url: &Url, token: &AccessToken) -> Result<Response, GatewayError> {
        debug!(url = %url.path(), "upstream request");
        let resp = self
            .http
            .get(url.clone())
            .header(USER_AGENT, self.user_agent.clone())
            .header(AUTHORIZATION, format!("Bearer {}", token.secret()))
            .send()?;
        self.capture_rate(resp.headers());
        Ok(resp)
    }

    fn capture_rate(&self, headers: &HeaderMap) {
        let remaining = header_float(headers, "x-ratelimit-remaining");
        let used = header_float(headers, "x-ratelimit-used");
        let reset = header_float(headers, "x-ratelimit-reset");
        if remaining == 0.0 && used == 0.0 && reset == 0.0 {
            return;
        }
        if remaining < RATE_LIMIT_FLOOR {
            warn!(remaining, reset_secs = reset, "upstream rate limit nearly exhausted");
        }
        let reset_at = SystemTime::now().checked_add(Duration::from_secs_f64(reset.max(0.0)));
        let mut rate = self.rate.write();
        rate.remaining = remaining;
        rate.used = used;
        rate.reset_at = reset_at;
    }
}

fn header_float(headers: &HeaderMap, key: &str) -> f64 {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn normalize_subreddit_name(name: &str) -> &str {
    let trimmed = name.trim().trim_start_matches('/');
    trimmed
        .strip_prefix("r/")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
}

/// Subreddit names are single path segments of letters, digits and `_`.
pub fn is_valid_subreddit_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listing<T> {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
}

impl<T> Listing<T> {
    fn into_page<U>(self, map: impl Fn(&T) -> U) -> Page<U> {
        Page {
            items: self
                .children
                .iter()
                .filter_map(|thing| thing.data.as_ref())
                .map(map)
                .collect(),
            after: self.after,
            before: self.before,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thing<T> {
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
struct ListingEnvelope<T> {
    data: Listing<T>,
}

/// One listing child as the upstream sends it. Post items (`t3`) and
/// subreddit items (`t5`) share this shape; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subreddit: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub ups: Option<i64>,
    #[serde(default)]
    pub downs: Option<i64>,
    #[serde(default)]
    pub num_comments: Option<i64>,
    #[serde(default)]
    pub created_utc: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub post_hint: Option<String>,
    #[serde(default)]
    pub is_video: Option<bool>,
    #[serde(default)]
    pub media: Option<PostMedia>,
    #[serde(default)]
    pub secure_media: Option<PostMedia>,
    #[serde(default)]
    pub crosspost_parent_list: Vec<CrosspostParent>,
    #[serde(default)]
    pub preview: Option<Preview>,
    #[serde(default)]
    pub gallery_data: Option<GalleryData>,
    #[serde(default)]
    pub media_metadata: Option<HashMap<String, MediaMetadata>>,

    // Subreddit-shaped fields.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub display_name_prefixed: Option<String>,
    #[serde(default)]
    pub public_description: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subscribers: Option<i64>,
    #[serde(default)]
    pub icon_img: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrosspostParent {
    #[serde(default)]
    pub media: Option<PostMedia>,
    #[serde(default)]
    pub secure_media: Option<PostMedia>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostMedia {
    #[serde(default)]
    pub reddit_video: Option<RedditVideo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedditVideo {
    #[serde(default)]
    pub fallback_url: String,
    #[serde(default)]
    pub hls_url: String,
    #[serde(default)]
    pub dash_url: String,
    #[serde(default)]
    pub scrubber_media_url: String,
    #[serde(default)]
    pub transcoding_status: String,
    #[serde(default)]
    pub is_gif: bool,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Preview {
    #[serde(default)]
    pub images: Vec<PreviewImage>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PreviewImage {
    #[serde(default)]
    pub source: PreviewSource,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PreviewSource {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryData {
    #[serde(default)]
    pub items: Vec<GalleryItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryItem {
    pub media_id: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MediaMetadata {
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "s")]
    pub full: MediaMetadataImage,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MediaMetadataImage {
    #[serde(default, rename = "u")]
    pub url: Option<String>,
    #[serde(default)]
    pub gif: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subreddit_names_lose_prefixes() {
        assert_eq!(normalize_subreddit_name("r/rust"), "rust");
        assert_eq!(normalize_subreddit_name("/r/rust/"), "rust");
        assert_eq!(normalize_subreddit_name("  gaming "), "gaming");
        assert_eq!(normalize_subreddit_name("r/"), "");
    }

    #[test]
    fn subreddit_names_are_single_segments() {
        assert!(is_valid_subreddit_name("rust"));
        assert!(is_valid_subreddit_name("Ask_Reddit2"));
        assert!(!is_valid_subreddit_name(""));
        assert!(!is_valid_subreddit_name("../api/v1/me#"));
        assert!(!is_valid_subreddit_name("rust/new"));
        assert!(!is_valid_subreddit_name("rust?limit=100"));
    }

    #[test]
    fn listing_options_skip_blank_cursor() {
        let params = ListingOptions::page(Some("  ")).into_params();
        assert_eq!(params, vec![("limit".to_string(), "10".to_string())]);

        let params = ListingOptions::page(Some("t3_abc")).into_params();
        assert!(params.contains(&("after".to_string(), "t3_abc".to_string())));
    }

    #[test]
    fn listing_decodes_mixed_children() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_next",
                "before": null,
                "children": [
                    {"kind": "t3", "data": {"id": "a1", "title": "Post", "ups": 3}},
                    {"kind": "t5", "data": {"name": "t5_x", "display_name": "rust", "subscribers": null}}
                ]
            }
        }"#;
        let envelope: ListingEnvelope<Item> = serde_json::from_str(raw).unwrap();
        let page = envelope.data.into_page(CanonicalPost::from_item);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].ups, 3);
        assert_eq!(page.items[1].title, "rust");
        assert_eq!(page.after.as_deref(), Some("t3_next"));
        assert!(page.before.is_none());
    }

    #[test]
    fn empty_cursor_normalizes_to_none() {
        let listing: Listing<Item> = serde_json::from_str(
            r#"{"after": "", "before": null, "children": []}"#,
        )
        .unwrap();
        let page = listing.into_page(CanonicalSubreddit::from_item);
        assert!(page.items.is_empty());
        assert!(page.after.is_none());
    }
}
