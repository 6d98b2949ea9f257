use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::reddit::{Item, PostMedia, RedditVideo};

static IMAGE_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|gif|webp)(\?.*)?$").expect("valid image extension pattern")
});

static IMAGE_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(i\.redd\.it|i\.imgur\.com|preview\.redd\.it)/")
        .expect("valid image host pattern")
});

/// What a post can display besides its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaDescriptor {
    Image {
        urls: Vec<String>,
    },
    Video {
        fallback_url: String,
        is_gif: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<i64>,
    },
}

impl MediaDescriptor {
    pub fn primary_url(&self) -> Option<&str> {
        match self {
            MediaDescriptor::Image { urls } => urls.first().map(String::as_str),
            MediaDescriptor::Video { fallback_url, .. } => Some(fallback_url.as_str()),
        }
    }
}

/// Picks the media for a post. A hosted video wins over any image; images
/// come from the preview, then the gallery, then a direct image link, then
/// the thumbnail.
pub fn select(item: &Item, thumbnail: Option<&str>) -> Option<MediaDescriptor> {
    if let Some(video) = find_video(item) {
        return Some(video);
    }

    let mut urls: Vec<String> = item
        .preview
        .iter()
        .flat_map(|preview| preview.images.iter())
        .map(|image| decode_entities(image.source.url.trim()))
        .filter(|url| !url.is_empty())
        .collect();

    if urls.is_empty() {
        urls = gallery_urls(item);
    }

    if urls.is_empty() {
        if let Some(url) = item.url.as_deref().map(str::trim) {
            if is_direct_image(url) {
                urls.push(url.to_string());
            }
        }
    }

    if urls.is_empty() {
        if let Some(thumb) = thumbnail {
            urls.push(thumb.to_string());
        }
    }

    if urls.is_empty() {
        None
    } else {
        Some(MediaDescriptor::Image { urls })
    }
}

pub fn is_direct_image(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    IMAGE_EXTENSION.is_match(url) || IMAGE_HOST.is_match(url)
}

/// Undoes the HTML escaping the upstream applies to URLs in listing JSON.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn find_video(item: &Item) -> Option<MediaDescriptor> {
    video_from_media(item.secure_media.as_ref())
        .or_else(|| video_from_media(item.media.as_ref()))
        .or_else(|| {
            item.crosspost_parent_list.iter().find_map(|parent| {
                video_from_media(parent.secure_media.as_ref())
                    .or_else(|| video_from_media(parent.media.as_ref()))
            })
        })
}

fn video_from_media(media: Option<&PostMedia>) -> Option<MediaDescriptor> {
    let video = media?.reddit_video.as_ref()?;
    from_reddit_video(video)
}

fn from_reddit_video(video: &RedditVideo) -> Option<MediaDescriptor> {
    if video.transcoding_status.eq_ignore_ascii_case("error") {
        return None;
    }

    let playback = [
        &video.fallback_url,
        &video.hls_url,
        &video.dash_url,
        &video.scrubber_media_url,
    ]
    .into_iter()
    .map(|url| url.trim())
    .find(|url| !url.is_empty())?;

    Some(MediaDescriptor::Video {
        fallback_url: decode_entities(playback),
        is_gif: video.is_gif,
        width: some_positive(video.width),
        height: some_positive(video.height),
    })
}

fn gallery_urls(item: &Item) -> Vec<String> {
    let (Some(gallery), Some(metadata)) = (item.gallery_data.as_ref(), item.media_metadata.as_ref())
    else {
        return Vec::new();
    };
    gallery
        .items
        .iter()
        .filter_map(|entry| metadata.get(&entry.media_id))
        .filter(|meta| meta.status.is_empty() || meta.status.eq_ignore_ascii_case("valid"))
        .filter_map(|meta| meta.full.url.as_deref().or(meta.full.gif.as_deref()))
        .map(|url| decode_entities(url.trim()))
        .filter(|url| !url.is_empty())
        .collect()
}

fn some_positive(value: i64) -> Option<i64> {
    if value > 0 {
        Some(value)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(raw: &str) -> Item {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn video_takes_precedence_over_preview() {
        let post = item(
            r#"{
                "is_video": true,
                "secure_media": {"reddit_video": {
                    "fallback_url": "https://v.redd.it/abc/DASH_720.mp4?source=fallback",
                    "hls_url": "https://v.redd.it/abc/HLSPlaylist.m3u8",
                    "width": 1280, "height": 720
                }},
                "preview": {"images": [{"source": {"url": "https://preview.redd.it/x.jpg"}}]}
            }"#,
        );
        let media = select(&post, None).unwrap();
        assert_eq!(
            media,
            MediaDescriptor::Video {
                fallback_url: "https://v.redd.it/abc/DASH_720.mp4?source=fallback".into(),
                is_gif: false,
                width: Some(1280),
                height: Some(720),
            }
        );
    }

    #[test]
    fn video_from_crosspost_parent() {
        let post = item(
            r#"{"crosspost_parent_list": [{"media": {"reddit_video": {"hls_url": "https://v.redd.it/p/HLS.m3u8"}}}]}"#,
        );
        let media = select(&post, None).unwrap();
        assert_eq!(media.primary_url(), Some("https://v.redd.it/p/HLS.m3u8"));
    }

    #[test]
    fn failed_transcode_is_skipped() {
        let post = item(
            r#"{"media": {"reddit_video": {"fallback_url": "https://v.redd.it/x.mp4", "transcoding_status": "error"}}, "url": "https://i.redd.it/pic.png"}"#,
        );
        let media = select(&post, None).unwrap();
        assert_eq!(media.primary_url(), Some("https://i.redd.it/pic.png"));
    }

    #[test]
    fn preview_urls_are_entity_decoded() {
        let post = item(
            r#"{"preview": {"images": [{"source": {"url": "https://preview.redd.it/a.jpg?width=640&amp;s=abc"}}]}}"#,
        );
        let media = select(&post, None).unwrap();
        assert_eq!(
            media,
            MediaDescriptor::Image {
                urls: vec!["https://preview.redd.it/a.jpg?width=640&s=abc".into()]
            }
        );
    }

    #[test]
    fn gallery_images_follow_gallery_order() {
        let post = item(
            r#"{
                "gallery_data": {"items": [{"id": 1, "media_id": "b"}, {"id": 2, "media_id": "a"}]},
                "media_metadata": {
                    "a": {"status": "valid", "e": "Image", "s": {"u": "https://preview.redd.it/a.png?x=1&amp;y=2"}},
                    "b": {"status": "valid", "e": "Image", "s": {"u": "https://preview.redd.it/b.png"}}
                }
            }"#,
        );
        let media = select(&post, None).unwrap();
        assert_eq!(
            media,
            MediaDescriptor::Image {
                urls: vec![
                    "https://preview.redd.it/b.png".into(),
                    "https://preview.redd.it/a.png?x=1&y=2".into(),
                ]
            }
        );
    }

    #[test]
    fn direct_image_link_then_thumbnail() {
        let post = item(r#"{"url": "https://example.com/cat.JPEG"}"#);
        assert_eq!(
            select(&post, None).unwrap().primary_url(),
            Some("https://example.com/cat.JPEG")
        );

        let post = item(r#"{"url": "https://example.com/article"}"#);
        assert_eq!(
            select(&post, Some("https://b.thumbs.redditmedia.com/t.jpg"))
                .unwrap()
                .primary_url(),
            Some("https://b.thumbs.redditmedia.com/t.jpg")
        );
        assert!(select(&post, None).is_none());
    }

    #[test]
    fn image_hosts_are_recognized_without_extension() {
        assert!(is_direct_image("https://i.imgur.com/abcdef"));
        assert!(is_direct_image("https://i.redd.it/xyz"));
        assert!(is_direct_image("https://example.com/a.webp?foo=bar"));
        assert!(!is_direct_image("https://imgur.com/gallery/abc"));
        assert!(!is_direct_image(""));
    }

    #[test]
    fn decode_handles_common_entities() {
        assert_eq!(decode_entities("a&amp;b&lt;c&gt;&quot;d&#39;"), "a&b<c>\"d'");
        assert_eq!(decode_entities("&amp;amp;"), "&amp;");
        assert_eq!(decode_entities("plain"), "plain");
    }
}
