//! Post discovery in platform HTML and JSON.
//!
//! Every technique runs and results are unioned in technique order; the first
//! sighting of a post id fixes its position, later sightings only fill gaps
//! (metrics, caption, author).

use lazy_regex::{regex, Regex};
use select::document::Document;
use select::predicate::Name;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

use crate::core::config::collection::HTML_SAMPLE_BYTES;
use crate::core::config::instagram::BASE_URL;
use crate::core::types::{EngagementMetrics, StrategyKind, VideoDescriptor};

const MAX_DEPTH: usize = 15;
const MIN_SHORTCODE_LEN: usize = 6;
const BARE_SHORTCODE_LEN: usize = 11;

/// Path segments that are never profile handles.
const RESERVED: &[&str] = &[
    "p",
    "reel",
    "reels",
    "tv",
    "stories",
    "explore",
    "accounts",
    "about",
    "legal",
    "developer",
    "directory",
    "api",
    "static",
    "favicon.ico",
];

/// Shortcode of a post URL (`/p/`, `/reel/`, `/reels/`, `/tv/`, with or without a username prefix).
pub fn shortcode_from_url(url: &str) -> Option<String> {
    regex!(r"/(?:p|reel|reels|tv)/([^/?#]+)/?")
        .captures(url)
        .map(|c| c[1].to_string())
        .filter(|code| code.len() >= MIN_SHORTCODE_LEN && is_shortcode_charset(code))
}

/// Canonical `https://www.instagram.com/<kind>/<code>/`.
pub fn canonical_post_url(kind: &str, code: &str) -> String {
    let kind = match kind.to_ascii_lowercase().as_str() {
        "reel" | "reels" => "reel",
        "tv" => "tv",
        _ => "p",
    };
    format!("{}/{}/{}/", BASE_URL, kind, code)
}

/// Absolute post URL with query and fragment stripped; `None` for non-post links.
pub fn clean_post_url(href: &str) -> Option<String> {
    let absolute = if href.starts_with('/') {
        format!("{}{}", BASE_URL, href)
    } else {
        href.to_string()
    };
    let mut url = Url::parse(&absolute).ok()?;
    if !url.host_str()?.ends_with("instagram.com") {
        return None;
    }
    shortcode_from_url(url.path())?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

/// Username of a profile URL (`instagram.com/<handle>/`); `None` for posts and reserved paths.
pub fn extract_profile_username(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    if host != "instagram.com" && host != "www.instagram.com" {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let username = match segments.as_slice() {
        [name] | [name, "reels"] => *name,
        _ => return None,
    };
    if RESERVED.contains(&username) || !is_valid_handle(username) {
        return None;
    }
    Some(username.to_string())
}

/// 1-30 chars of letters, digits, dots and underscores.
pub fn is_valid_handle(name: &str) -> bool {
    !name.is_empty() && name.len() <= 30 && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

/// Handle from `@name`, `name` or a profile URL.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.contains("instagram.com") {
        let with_scheme = if raw.starts_with("http") { raw.to_string() } else { format!("https://{}", raw) };
        return Url::parse(&with_scheme).ok().as_ref().and_then(extract_profile_username);
    }
    let name = raw.trim_start_matches('@').trim_matches('/');
    is_valid_handle(name).then(|| name.to_string())
}

/// Tag from `#tag`, `tag` or an `explore/tags/<tag>` URL.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let tag = match regex!(r"/explore/tags/([^/?#]+)").captures(raw) {
        Some(c) => c[1].to_string(),
        None => raw.trim_start_matches('#').to_string(),
    };
    let tag = tag.trim().to_lowercase();
    (!tag.is_empty() && tag.chars().all(|c| c.is_alphanumeric() || c == '_')).then_some(tag)
}

/// Post URLs of a url-list identifier (separated by whitespace or commas), cleaned and deduplicated.
pub fn split_url_list(raw: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for url in raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(clean_post_url)
    {
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// Ordered, id-deduplicated descriptor collection.
#[derive(Debug)]
pub struct Discovered {
    strategy: StrategyKind,
    items: Vec<VideoDescriptor>,
    index: HashMap<String, usize>,
}

impl Discovered {
    pub fn new(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            items: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, descriptor: VideoDescriptor) {
        match self.index.get(&descriptor.post_id) {
            Some(&i) => merge_into(&mut self.items[i], descriptor),
            None => {
                self.index.insert(descriptor.post_id.clone(), self.items.len());
                self.items.push(descriptor);
            }
        }
    }

    pub fn push_link(&mut self, url: &str) {
        if let (Some(code), Some(clean)) = (shortcode_from_url(url), clean_post_url(url)) {
            self.push(VideoDescriptor::from_link(clean, code, self.strategy));
        }
    }

    pub fn push_code(&mut self, code: &str) {
        if code.len() >= MIN_SHORTCODE_LEN && is_shortcode_charset(code) {
            self.push(VideoDescriptor::from_link(canonical_post_url("p", code), code, self.strategy));
        }
    }

    pub fn extend(&mut self, other: Discovered) {
        for d in other.items {
            self.push(d);
        }
    }

    pub fn into_vec(self) -> Vec<VideoDescriptor> {
        self.items
    }
}

fn merge_into(existing: &mut VideoDescriptor, newer: VideoDescriptor) {
    existing.author = existing.author.take().or(newer.author);
    existing.title = existing.title.take().or(newer.title);
    existing.description = existing.description.take().or(newer.description);
    existing.duration_secs = existing.duration_secs.or(newer.duration_secs);
    existing.thumbnail_url = existing.thumbnail_url.take().or(newer.thumbnail_url);
    existing.metrics.views = existing.metrics.views.or(newer.metrics.views);
    existing.metrics.likes = existing.metrics.likes.or(newer.metrics.likes);
    existing.metrics.comments = existing.metrics.comments.or(newer.metrics.comments);
}

/// Runs every HTML technique over (the head of) a page.
pub fn extract_from_html(html: &str, strategy: StrategyKind) -> Vec<VideoDescriptor> {
    let html = sample(html);
    let mut found = Discovered::new(strategy);

    for marker in [
        regex!(r"window\._sharedData\s*=\s*"),
        regex!(r"window\.__additionalDataLoaded\s*\(\s*[^,]+,\s*"),
        regex!(r"window\.__initialDataLoaded\s*=\s*"),
    ] {
        if let Some(value) = json_after(html, marker) {
            walk_json(&value, &mut found);
        }
    }
    let embedded = found.len();

    let doc = Document::from(html);
    for script in doc.find(Name("script")) {
        let kind = script.attr("type").unwrap_or("text/javascript").to_ascii_lowercase();
        if !matches!(kind.as_str(), "application/json" | "application/ld+json" | "text/javascript") {
            continue;
        }
        let text = script.text();
        if !text.contains("shortcode") && !text.contains("\"code\"") {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
            walk_json(&value, &mut found);
        }
        for caps in regex!(r#""shortcode"\s*:\s*"([\w-]+)""#).captures_iter(&text) {
            found.push_code(&caps[1]);
        }
    }
    let scripted = found.len();

    for anchor in doc.find(Name("a")) {
        if let Some(href) = anchor.attr("href") {
            if ["/p/", "/reel/", "/reels/"].iter().any(|p| href.contains(p)) {
                found.push_link(href);
            }
        }
    }
    let anchored = found.len();

    aggressive_scan(html, &mut found);

    log::debug!(
        "Link extraction: {} embedded, {} scripts, {} anchors, {} total",
        embedded,
        scripted - embedded,
        anchored - scripted,
        found.len()
    );
    found.into_vec()
}

/// Posts found anywhere inside a JSON document.
pub fn extract_from_json(value: &Value, strategy: StrategyKind) -> Vec<VideoDescriptor> {
    let mut found = Discovered::new(strategy);
    walk_json(value, &mut found);
    found.into_vec()
}

pub fn walk_json(value: &Value, found: &mut Discovered) {
    walk(value, 0, found);
}

fn walk(value: &Value, depth: usize, found: &mut Discovered) {
    if depth > MAX_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(descriptor) = node_descriptor(value, found.strategy) {
                found.push(descriptor);
            }
            for child in map.values() {
                if child.is_object() || child.is_array() {
                    walk(child, depth + 1, found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, depth + 1, found);
            }
        }
        _ => {}
    }
}

/// A node is a video post when it carries a shortcode and any video indicator.
fn node_descriptor(node: &Value, strategy: StrategyKind) -> Option<VideoDescriptor> {
    let code = str_at(node, &["/shortcode", "/code"])?;
    if code.len() < MIN_SHORTCODE_LEN || !is_shortcode_charset(code) || !is_video_node(node) {
        return None;
    }

    let is_reel = node.get("product_type").and_then(Value::as_str) == Some("clips");
    let source_url = str_at(node, &["/permalink", "/url"])
        .and_then(clean_post_url)
        .filter(|u| shortcode_from_url(u).as_deref() == Some(code))
        .unwrap_or_else(|| canonical_post_url(if is_reel { "reel" } else { "p" }, code));

    let caption = str_at(
        node,
        &["/edge_media_to_caption/edges/0/node/text", "/caption/text", "/caption", "/accessibility_caption"],
    )
    .map(str::to_string);

    let mut descriptor = VideoDescriptor::from_link(source_url, code, strategy)
        .with_metrics(EngagementMetrics {
            views: u64_at(node, &["/video_view_count", "/play_count", "/ig_play_count", "/view_count"]),
            likes: u64_at(node, &["/like_count", "/edge_liked_by/count", "/edge_media_preview_like/count"]),
            comments: u64_at(node, &["/comment_count", "/comments_count", "/edge_media_to_comment/count"]),
        })
        .with_author(str_at(node, &["/owner/username", "/user/username", "/username"]).map(str::to_string));
    descriptor.title = caption.as_deref().map(first_line);
    descriptor.description = caption;
    descriptor.duration_secs = node.get("video_duration").and_then(Value::as_f64);
    descriptor.thumbnail_url = str_at(
        node,
        &["/thumbnail_src", "/thumbnail_url", "/display_url", "/image_versions2/candidates/0/url"],
    )
    .map(str::to_string);
    Some(descriptor)
}

fn is_video_node(node: &Value) -> bool {
    node.get("is_video").and_then(Value::as_bool).unwrap_or(false)
        || matches!(node.get("media_type"), Some(Value::Number(n)) if n.as_u64() == Some(2))
        || matches!(node.get("media_type").and_then(Value::as_str), Some("VIDEO") | Some("REELS"))
        || node.get("product_type").and_then(Value::as_str) == Some("clips")
        || node
            .get("__typename")
            .and_then(Value::as_str)
            .is_some_and(|t| t.to_lowercase().contains("video"))
        || node.get("video_versions").is_some_and(|v| !v.is_null())
        || node.get("video_url").is_some_and(|v| !v.is_null())
}

/// Whole-document regex pass for link-shaped substrings and bare identifiers.
fn aggressive_scan(html: &str, found: &mut Discovered) {
    for caps in regex!(r"(?i)(?:https?://(?:www\.)?instagram\.com)?/(p|reel|reels|tv)/([\w-]{6,})").captures_iter(html) {
        let code = &caps[2];
        if is_shortcode_charset(code) {
            found.push(VideoDescriptor::from_link(
                canonical_post_url(&caps[1], code),
                code,
                found.strategy,
            ));
        }
    }

    let token_patterns: [&Regex; 3] = [
        regex!(r#""shortcode"\s*:\s*"([\w-]+)""#),
        regex!(r#""code"\s*:\s*"([\w-]+)""#),
        regex!(r#"data-shortcode=["']([^"']+)["']"#),
    ];
    for pattern in token_patterns {
        for caps in pattern.captures_iter(html) {
            found.push_code(&caps[1]);
        }
    }

    for m in regex!(r"\b[A-Za-z0-9]{11}\b").find_iter(html) {
        if looks_like_bare_shortcode(m.as_str()) {
            found.push_code(m.as_str());
        }
    }
}

/// Plain words and numbers are not shortcodes: require a digit-letter mix or mixed case.
fn looks_like_bare_shortcode(token: &str) -> bool {
    if token.len() != BARE_SHORTCODE_LEN {
        return false;
    }
    let digits = token.chars().filter(char::is_ascii_digit).count();
    let upper = token.chars().filter(char::is_ascii_uppercase).count();
    let lower = token.chars().filter(char::is_ascii_lowercase).count();
    (digits > 0 && upper + lower > 0) || (upper >= 2 && lower >= 1)
}

fn is_shortcode_charset(code: &str) -> bool {
    code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parses exactly one JSON value following the marker match.
pub(crate) fn json_after(html: &str, marker: &Regex) -> Option<Value> {
    let end = marker.find(html)?.end();
    let mut stream = serde_json::Deserializer::from_str(&html[end..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => Some(value),
        Some(Err(e)) => {
            log::debug!("Embedded JSON after {:?} did not parse: {}", marker.as_str(), e);
            None
        }
        None => None,
    }
}

/// Head of the page, cut on a char boundary.
fn sample(html: &str) -> &str {
    if html.len() <= HTML_SAMPLE_BYTES {
        return html;
    }
    let mut end = HTML_SAMPLE_BYTES;
    while !html.is_char_boundary(end) {
        end -= 1;
    }
    &html[..end]
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().chars().take(100).collect()
}

pub(crate) fn str_at<'a>(node: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|p| node.pointer(p).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn u64_at(node: &Value, pointers: &[&str]) -> Option<u64> {
    pointers.iter().find_map(|p| {
        let v = node.pointer(p)?;
        v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64))
    })
}
