//! Listing through the external yt-dlp binary.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::parse::{clean_post_url, normalize_handle, normalize_tag, shortcode_from_url, split_url_list, Discovered};
use super::ytdlp_errors::{analyze_ytdlp_error, get_fix_recommendations, to_strategy_error};
use super::{ExtractionStrategy, StrategyContext, StrategyError};
use crate::core::config::{collection, instagram, timeouts, Settings, YTDL_BIN};
use crate::core::types::{EngagementMetrics, SourceKind, SourceSpec, StrategyKind, VideoDescriptor};
use crate::core::validation;
use crate::session::netscape::write_netscape;
use crate::session::SessionState;

/// Inclusive duration window in seconds applied while listing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DurationBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl DurationBounds {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            min: settings.min_duration,
            max: settings.max_duration,
        }
    }

    /// Unknown durations pass.
    pub fn contains(&self, duration: Option<f64>) -> bool {
        let Some(d) = duration else { return true };
        self.min.map_or(true, |min| d >= min) && self.max.map_or(true, |max| d <= max)
    }
}

/// Fields of a yt-dlp info dict we care about (flat entries and full dumps alike).
#[derive(Debug, Default, Deserialize)]
struct InfoDict {
    url: Option<String>,
    webpage_url: Option<String>,
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    view_count: Option<u64>,
    like_count: Option<u64>,
    comment_count: Option<u64>,
    uploader: Option<String>,
    channel: Option<String>,
    extractor: Option<String>,
    ie_key: Option<String>,
    entries: Option<Vec<Option<InfoDict>>>,
}

impl InfoDict {
    fn link(&self) -> Option<&str> {
        self.webpage_url
            .as_deref()
            .filter(|u| shortcode_from_url(u).is_some())
            .or(self.url.as_deref())
    }

    /// Video evidence of a flat entry: a duration, a reel link, or a video extractor.
    fn looks_like_video(&self) -> bool {
        let link = self.link().unwrap_or_default().to_lowercase();
        let extractor = self
            .extractor
            .as_deref()
            .or(self.ie_key.as_deref())
            .unwrap_or_default()
            .to_lowercase();
        self.duration.is_some_and(|d| d > 0.0) || link.contains("reel") || extractor.contains("video")
    }

    fn into_descriptor(self, fallback_author: Option<&str>) -> Option<VideoDescriptor> {
        let link = self.link()?.to_string();
        let code = shortcode_from_url(&link)?;
        let source_url = clean_post_url(&link).unwrap_or(link);
        let author = self
            .uploader
            .or(self.channel)
            .or_else(|| fallback_author.map(str::to_string));

        let mut descriptor = VideoDescriptor::from_link(source_url, code, StrategyKind::BulkExtractorTool)
            .with_metrics(EngagementMetrics {
                views: self.view_count,
                likes: self.like_count,
                comments: self.comment_count,
            })
            .with_author(author);
        descriptor.title = self.title.filter(|t| !t.is_empty());
        descriptor.description = self.description.filter(|d| !d.is_empty());
        descriptor.duration_secs = self.duration;
        descriptor.thumbnail_url = self.thumbnail;
        Some(descriptor)
    }
}

/// Runs yt-dlp with a hard deadline; the child is killed when the future is dropped.
pub(crate) async fn run_ytdlp(bin: &str, args: &[String], limit: Duration) -> Result<Output, StrategyError> {
    log::debug!("yt-dlp: {} {}", bin, args.join(" "));
    let mut command = Command::new(bin);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(limit, command.output()).await {
        Err(_) => {
            log::warn!("yt-dlp: no answer within {}s, killed", limit.as_secs());
            Err(StrategyError::Timeout)
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StrategyError::Unsupported(format!("{} is not installed", bin)))
        }
        Ok(Err(e)) => Err(StrategyError::TransientNetwork(e.to_string())),
        Ok(Ok(output)) => Ok(output),
    }
}

/// Maps a failed yt-dlp run to the strategy taxonomy, logging the hint for operators.
pub(crate) fn failure_from_output(output: &Output) -> StrategyError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let error_type = analyze_ytdlp_error(&stderr);
    log::warn!(
        "yt-dlp: exit {:?}, {:?}. {}",
        output.status.code(),
        error_type,
        get_fix_recommendations(&error_type)
    );
    to_strategy_error(&error_type, &stderr)
}

/// Writes the session as a Netscape cookie file that lives as long as the returned handle.
pub(crate) async fn session_cookie_file(session: Option<&SessionState>) -> Option<NamedTempFile> {
    let session = session?;
    let file = match NamedTempFile::new() {
        Ok(f) => f,
        Err(e) => {
            log::warn!("yt-dlp: cannot create cookie file: {}", e);
            return None;
        }
    };
    match write_netscape(session, file.path()).await {
        Ok(()) => Some(file),
        Err(e) => {
            log::warn!("yt-dlp: cannot write cookie file: {}", e);
            None
        }
    }
}

pub struct BulkExtractorTool {
    ctx: StrategyContext,
    bin: String,
    bounds: DurationBounds,
    listing_timeout: Duration,
}

impl BulkExtractorTool {
    pub fn new(ctx: StrategyContext, bounds: DurationBounds) -> Self {
        Self {
            ctx,
            bin: YTDL_BIN.clone(),
            bounds,
            listing_timeout: timeouts::ytdlp_listing(),
        }
    }

    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    pub fn with_listing_timeout(mut self, limit: Duration) -> Self {
        self.listing_timeout = limit;
        self
    }

    /// Connection, proxy, cookie and UA flags shared by every invocation.
    fn common_args(&self, cookies: Option<&Path>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--no-warnings".into(),
            "--socket-timeout".into(),
            "30".into(),
            "--retries".into(),
            "2".into(),
        ];
        if let Some(proxy) = self.ctx.proxies.next() {
            args.push("--proxy".into());
            args.push(proxy.to_url());
        }
        if let Some(path) = cookies {
            args.push("--cookies".into());
            args.push(path.to_string_lossy().into_owned());
        }
        args.push("--user-agent".into());
        args.push(self.ctx.delay.current_user_agent());
        args
    }

    fn listing_args(&self, target: &str, cap: usize, cookies: Option<&Path>) -> Vec<String> {
        let end = if cap == 0 { collection::DEFAULT_CAP } else { cap };
        let mut args: Vec<String> = vec![
            "--flat-playlist".into(),
            "--dump-single-json".into(),
            "--playlist-end".into(),
            end.to_string(),
        ];
        args.extend(self.common_args(cookies));
        args.push(target.to_string());
        args
    }

    fn listing_target(spec: &SourceSpec) -> Result<(String, Option<String>), StrategyError> {
        match spec.kind {
            SourceKind::Profile | SourceKind::Reels => {
                let handle = normalize_handle(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad handle {:?}", spec.identifier)))?;
                let suffix = if spec.kind == SourceKind::Reels { "reels/" } else { "" };
                Ok((format!("{}/{}/{}", instagram::BASE_URL, handle, suffix), Some(handle)))
            }
            SourceKind::Hashtag | SourceKind::Keyword => {
                let tag = normalize_tag(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad hashtag {:?}", spec.identifier)))?;
                Ok((format!("{}/explore/tags/{}/", instagram::BASE_URL, tag), None))
            }
            SourceKind::UrlList => Err(StrategyError::Unsupported("url lists are not listed".to_string())),
        }
    }

    async fn dump(&self, args: &[String]) -> Result<InfoDict, StrategyError> {
        let output = run_ytdlp(&self.bin, args, self.listing_timeout).await?;
        if !output.status.success() {
            return Err(failure_from_output(&output));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| StrategyError::TransientNetwork(format!("unreadable yt-dlp output: {}", e)))
    }

    async fn list(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        let (target, author) = Self::listing_target(spec)?;
        self.ctx.delay.between_requests().await;
        let cookies = session_cookie_file(self.ctx.session.as_ref()).await;
        let args = self.listing_args(&target, cap, cookies.as_ref().map(|f| f.path()));

        log::info!("BulkExtractorTool: listing {} (cap {})", target, cap);
        let entries = self.dump(&args).await?.entries.unwrap_or_default();
        if entries.is_empty() {
            log::warn!("BulkExtractorTool: no entries for {} (private or unavailable?)", target);
        }

        let mut found = Discovered::new(StrategyKind::BulkExtractorTool);
        let mut skipped = 0usize;
        for entry in entries.into_iter().flatten() {
            if found.len() >= cap {
                break;
            }
            if !entry.looks_like_video() || !self.bounds.contains(entry.duration) {
                skipped += 1;
                continue;
            }
            let Some(descriptor) = entry.into_descriptor(author.as_deref()) else {
                skipped += 1;
                continue;
            };
            if spec.has_thresholds() && !validation::keep(&descriptor, spec.min_views, spec.min_likes) {
                skipped += 1;
                continue;
            }
            log::info!("✅ BulkExtractorTool: video {}/{}: {}", found.len() + 1, cap, descriptor.source_url);
            found.push(descriptor);
        }

        log::info!("BulkExtractorTool: {} accepted, {} skipped", found.len(), skipped);
        Ok(found.into_vec())
    }

    /// One full metadata dump per URL.
    async fn describe_urls(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        let urls = split_url_list(&spec.identifier);
        if urls.is_empty() {
            return Err(StrategyError::NotFound("no post URLs in list".to_string()));
        }
        let cookies = session_cookie_file(self.ctx.session.as_ref()).await;
        let mut found = Discovered::new(StrategyKind::BulkExtractorTool);
        let mut last_error = None;

        for url in urls.iter().take(cap) {
            self.ctx.delay.between_requests().await;
            let mut args: Vec<String> = vec!["--dump-single-json".into(), "--skip-download".into()];
            args.extend(self.common_args(cookies.as_ref().map(|f| f.path())));
            args.push(url.clone());

            match self.dump(&args).await {
                Ok(info) => {
                    let info = InfoDict {
                        webpage_url: info.webpage_url.or_else(|| Some(url.clone())),
                        ..info
                    };
                    if let Some(descriptor) = info.into_descriptor(None) {
                        found.push(descriptor);
                    }
                }
                Err(e) if e.is_rate_limited() || matches!(e, StrategyError::AuthRequired(_)) => return Err(e),
                Err(e) => {
                    log::warn!("BulkExtractorTool: {} failed: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        match (found.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(found.into_vec()),
        }
    }
}

#[async_trait]
impl ExtractionStrategy for BulkExtractorTool {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BulkExtractorTool
    }

    fn supports(&self, _kind: SourceKind) -> bool {
        true
    }

    fn budget(&self) -> Duration {
        self.listing_timeout + self.ctx.delay.request_ceiling() + Duration::from_secs(5)
    }

    fn retry_on_rate_limit(&self) -> bool {
        true
    }

    async fn collect(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        match spec.kind {
            SourceKind::UrlList => self.describe_urls(spec, cap).await,
            _ => self.list(spec, cap).await,
        }
    }
}
