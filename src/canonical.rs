//! Canonical records handed out by the gateway and accumulated by the
//! pagination controllers.
//!
//! Listing children arrive in two shapes that reuse many field names: posts
//! and subreddits. Each canonical field is resolved through a fixed
//! precedence list: the post-shaped field first, then the subreddit-shaped
//! one, then a default (`0` for counts, `""` for text, `None` for optional
//! links).

use serde::{Deserialize, Serialize};

use crate::media::{self, MediaDescriptor};
use crate::reddit::{normalize_subreddit_name, Item};

const PERMALINK_HOST: &str = "https://www.reddit.com";

/// One page of records plus the cursors the upstream issued with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            after: None,
            before: None,
        }
    }

    /// Blank cursors mean "no further page".
    pub fn normalized(mut self) -> Self {
        self.after = non_blank(self.after);
        self.before = non_blank(self.before);
        self
    }
}

fn non_blank(cursor: Option<String>) -> Option<String> {
    cursor.filter(|value| !value.trim().is_empty())
}

/// Records that can anchor a viewport sentinel.
pub trait Keyed {
    fn key(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalPost {
    pub id: String,
    pub title: String,
    pub author: String,
    pub ups: i64,
    pub downs: i64,
    pub vote_count: i64,
    pub num_comments: i64,
    pub url: String,
    pub selftext: String,
    pub created_utc: i64,
    pub subreddit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_hint: Option<String>,
}

impl CanonicalPost {
    pub fn from_item(item: &Item) -> Self {
        let ups = first_count(&[item.ups, item.subscribers]);
        let downs = first_count(&[item.downs]);
        let thumbnail = first_link(&[item.thumbnail.as_deref(), item.icon_img.as_deref()]);
        let permalink = item
            .permalink
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(|path| format!("{}{}", PERMALINK_HOST, path));

        Self {
            id: first_text(&[item.id.as_deref(), item.name.as_deref()]),
            title: first_text(&[item.title.as_deref(), item.display_name.as_deref()]),
            author: first_text(&[item.author.as_deref()]),
            ups,
            downs,
            vote_count: ups - downs,
            num_comments: first_count(&[item.num_comments]),
            url: first_text(&[item.url.as_deref(), permalink.as_deref()]),
            selftext: first_text(&[item.selftext.as_deref(), item.public_description.as_deref()]),
            created_utc: item.created_utc.map(|secs| secs.trunc() as i64).unwrap_or(0),
            subreddit: first_text(&[item.subreddit.as_deref(), item.display_name.as_deref()]),
            media: media::select(item, thumbnail.as_deref()),
            thumbnail,
            post_hint: content_hint(item),
        }
    }
}

impl Keyed for CanonicalPost {
    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalSubreddit {
    pub id: String,
    pub name: String,
    pub description: String,
    pub subscribers: i64,
    pub url: String,
}

impl CanonicalSubreddit {
    pub fn from_item(item: &Item) -> Self {
        let prefixed = item
            .display_name_prefixed
            .as_deref()
            .map(normalize_subreddit_name);
        let name = first_text(&[item.display_name.as_deref(), prefixed, item.title.as_deref()]);
        let fallback_url = if name.is_empty() {
            None
        } else {
            Some(format!("/r/{}/", name))
        };

        Self {
            id: first_text(&[item.name.as_deref(), item.id.as_deref()]),
            description: first_text(&[
                item.public_description.as_deref(),
                item.description.as_deref(),
            ]),
            subscribers: first_count(&[item.subscribers]),
            url: first_text(&[item.url.as_deref(), fallback_url.as_deref()]),
            name,
        }
    }

    /// Route target used when the entry is selected.
    pub fn route_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl Keyed for CanonicalSubreddit {
    fn key(&self) -> &str {
        &self.id
    }
}

fn first_text(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .map(|value| value.to_string())
        .unwrap_or_default()
}

fn first_count(candidates: &[Option<i64>]) -> i64 {
    candidates.iter().flatten().copied().next().unwrap_or(0)
}

/// Only absolute http(s) URLs count; `self`, `default`, `nsfw` and the like
/// are placeholders.
fn first_link(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .map(|value| media::decode_entities(value.trim()))
        .find(|value| value.starts_with("http://") || value.starts_with("https://"))
}

fn content_hint(item: &Item) -> Option<String> {
    match item.post_hint.as_deref().map(str::trim) {
        Some(hint) if !hint.is_empty() => Some(hint.to_string()),
        _ if item.is_video == Some(true) => Some("hosted:video".to_string()),
        _ => None,
    }
}
