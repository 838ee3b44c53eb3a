//! Download cascade for confirmed videos.
//!
//! yt-dlp first; when it fails, each [`MediaResolver`] in turn tries to find a
//! direct media URL which is then streamed to disk.

pub mod media;
pub mod resolvers;
pub mod ytdlp;

use rand::Rng;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum::Display;

use crate::core::config::{delay, Settings};
use crate::core::error::AppResult;
use crate::extract::browser::available_launchers;
use crate::extract::graph_api::GraphApiClient;
use crate::extract::parse::shortcode_from_url;
use crate::extract::{StrategyContext, StrategyError};
pub use media::MediaFetcher;
pub use resolvers::{GraphApiMedia, GraphQlEndpoint, MediaInfoEndpoint, MediaResolver, PostPage, RenderedPage, WebAccess};
pub use ytdlp::YtDlpDownloader;

/// Step of the cascade that produced the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DownloadMethod {
    /// Destination already held a non-empty file
    Existing,
    YtDlp,
    GraphApi,
    MediaInfo,
    GraphQl,
    PageScrape,
    Browser,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub url: String,
    pub path: PathBuf,
    pub success: bool,
    pub method: Option<DownloadMethod>,
    pub bytes: u64,
    /// Last failure when every step failed
    pub error: Option<String>,
}

impl DownloadResult {
    fn done(url: &str, path: &Path, method: DownloadMethod, bytes: u64) -> Self {
        Self {
            url: url.to_string(),
            path: path.to_path_buf(),
            success: true,
            method: Some(method),
            bytes,
            error: None,
        }
    }

    fn failed(url: &str, path: &Path, error: String) -> Self {
        Self {
            url: url.to_string(),
            path: path.to_path_buf(),
            success: false,
            method: None,
            bytes: 0,
            error: Some(error),
        }
    }
}

pub struct Downloader {
    ytdlp: Option<YtDlpDownloader>,
    resolvers: Vec<Box<dyn MediaResolver>>,
    fetcher: MediaFetcher,
    spacing: Duration,
    jitter: Duration,
}

impl Downloader {
    pub fn new(ytdlp: Option<YtDlpDownloader>, resolvers: Vec<Box<dyn MediaResolver>>, fetcher: MediaFetcher) -> Self {
        Self {
            ytdlp,
            resolvers,
            fetcher,
            spacing: Duration::from_secs_f64(delay::DOWNLOAD_SPACING_SECS),
            jitter: Duration::from_secs_f64(delay::DOWNLOAD_JITTER_SECS),
        }
    }

    /// Full cascade: yt-dlp, Graph API (when a token is configured), media info, GraphQL, post page, browser.
    pub fn from_settings(settings: &Settings, ctx: StrategyContext) -> AppResult<Self> {
        let proxy = ctx.proxies.next();
        let fetcher = MediaFetcher::new(&ctx.delay.current_user_agent(), proxy.as_ref())?;
        let web = WebAccess::new(ctx.clone());

        let mut resolvers: Vec<Box<dyn MediaResolver>> = Vec::new();
        if let Some(token) = &settings.graph_api_token {
            let api = GraphApiClient::new(token.clone(), settings.graph_api_user_id.clone(), proxy.as_ref())?
                .with_delay(Arc::clone(&ctx.delay));
            resolvers.push(Box::new(GraphApiMedia::new(api)));
        }
        resolvers.push(Box::new(MediaInfoEndpoint::new(web.clone())));
        resolvers.push(Box::new(GraphQlEndpoint::new(web.clone())));
        resolvers.push(Box::new(PostPage::new(web)));
        resolvers.push(Box::new(RenderedPage::new(ctx.clone(), available_launchers())));

        Ok(Self::new(Some(YtDlpDownloader::new(ctx)), resolvers, fetcher))
    }

    /// Pause between downloads: `spacing + uniform(0, jitter)`.
    pub fn with_spacing(mut self, spacing: Duration, jitter: Duration) -> Self {
        self.spacing = spacing;
        self.jitter = jitter;
        self
    }

    pub async fn download(&self, url: &str, destination: &Path) -> DownloadResult {
        if let Ok(meta) = fs_err::tokio::metadata(destination).await {
            if meta.is_file() && meta.len() > 0 {
                log::info!("Downloader: {} already present, skipping", destination.display());
                return DownloadResult::done(url, destination, DownloadMethod::Existing, meta.len());
            }
        }
        if let Some(parent) = destination.parent() {
            if let Err(e) = fs_err::tokio::create_dir_all(parent).await {
                return DownloadResult::failed(url, destination, e.to_string());
            }
        }

        let mut last_error = StrategyError::NotFound(format!("no download method succeeded for {}", url));

        if let Some(ytdlp) = &self.ytdlp {
            match ytdlp.download(url, destination).await {
                Ok(bytes) => {
                    log::info!("✅ Downloader: {} via yt-dlp", url);
                    return DownloadResult::done(url, destination, DownloadMethod::YtDlp, bytes);
                }
                Err(e) => {
                    log::warn!("Downloader: yt-dlp failed for {} ({}): {}", url, e.category(), e);
                    last_error = e;
                }
            }
        }

        let Some(shortcode) = shortcode_from_url(url) else {
            log::warn!("Downloader: {} is not a post URL, no fallback possible", url);
            return DownloadResult::failed(url, destination, last_error.to_string());
        };

        for resolver in &self.resolvers {
            let method = resolver.method();
            let media_url = match resolver.resolve(url, &shortcode).await {
                Ok(Some(media_url)) => media_url,
                Ok(None) => {
                    log::info!("Downloader: {} found no video for {}", method, shortcode);
                    continue;
                }
                Err(e) => {
                    log::warn!("Downloader: {} failed for {} ({}): {}", method, shortcode, e.category(), e);
                    last_error = e;
                    continue;
                }
            };
            match self.fetcher.fetch(&media_url, destination).await {
                Ok(bytes) => {
                    log::info!("✅ Downloader: {} via {}", url, method);
                    return DownloadResult::done(url, destination, method, bytes);
                }
                Err(e) => {
                    log::warn!("Downloader: media from {} failed to download: {}", method, e);
                    last_error = e;
                }
            }
        }

        log::error!("❌ Downloader: every method failed for {}: {}", url, last_error);
        DownloadResult::failed(url, destination, last_error.to_string())
    }

    /// Downloads each URL to `<dir>/<shortcode>.mp4`, pausing between network downloads.
    pub async fn download_many(&self, urls: &[String], dir: &Path) -> Vec<DownloadResult> {
        let mut results = Vec::with_capacity(urls.len());
        let mut previous_touched_network = false;

        for (index, url) in urls.iter().enumerate() {
            let name = shortcode_from_url(url).unwrap_or_else(|| format!("video_{}", index + 1));
            let destination = dir.join(format!("{}.mp4", name));

            if previous_touched_network {
                self.pause().await;
            }
            let result = self.download(url, &destination).await;
            previous_touched_network = result.method != Some(DownloadMethod::Existing);
            results.push(result);
        }

        let ok = results.iter().filter(|r| r.success).count();
        log::info!("Downloader: {}/{} downloaded into {}", ok, results.len(), dir.display());
        results
    }

    async fn pause(&self) {
        let extra = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rand::rng().random_range(0.0..self.jitter.as_secs_f64()))
        };
        tokio::time::sleep(self.spacing + extra).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedResolver {
        method: DownloadMethod,
        answer: Result<Option<String>, StrategyError>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaResolver for FixedResolver {
        fn method(&self) -> DownloadMethod {
            self.method
        }

        async fn resolve(&self, _post_url: &str, _shortcode: &str) -> Result<Option<String>, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn fetcher() -> MediaFetcher {
        MediaFetcher::new("Mozilla/5.0 test", None).unwrap()
    }

    fn resolver(
        method: DownloadMethod,
        answer: Result<Option<String>, StrategyError>,
        calls: &Arc<AtomicUsize>,
    ) -> Box<dyn MediaResolver> {
        Box::new(FixedResolver {
            method,
            answer,
            calls: Arc::clone(calls),
        })
    }

    #[tokio::test]
    async fn test_existing_file_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abc123.mp4");
        std::fs::write(&dest, b"already here").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let downloader = Downloader::new(
            None,
            vec![resolver(DownloadMethod::MediaInfo, Ok(None), &calls)],
            fetcher(),
        );
        let result = downloader
            .download("https://www.instagram.com/reel/abc123/", &dest)
            .await;

        assert!(result.success);
        assert_eq!(result.method, Some(DownloadMethod::Existing));
        assert_eq!(result.bytes, 12);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cascade_falls_through_to_working_resolver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/media/abc123.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 2048]))
            .expect(1)
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let downloader = Downloader::new(
            None,
            vec![
                resolver(
                    DownloadMethod::MediaInfo,
                    Err(StrategyError::AuthRequired("login".into())),
                    &calls,
                ),
                resolver(DownloadMethod::GraphQl, Ok(None), &calls),
                resolver(
                    DownloadMethod::PageScrape,
                    Ok(Some(format!("{}/media/abc123.mp4", server.uri()))),
                    &calls,
                ),
                resolver(DownloadMethod::Browser, Ok(None), &calls),
            ],
            fetcher(),
        );

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("abc123.mp4");
        let result = downloader
            .download("https://www.instagram.com/reel/abc123/", &dest)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.method, Some(DownloadMethod::PageScrape));
        assert_eq!(result.bytes, 2048);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 2048);
    }

    #[tokio::test]
    async fn test_all_methods_failing_reports_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let downloader = Downloader::new(
            None,
            vec![resolver(
                DownloadMethod::MediaInfo,
                Err(StrategyError::RateLimited { retry_after: None }),
                &calls,
            )],
            fetcher(),
        );

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abc123.mp4");
        let result = downloader
            .download("https://www.instagram.com/reel/abc123/", &dest)
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("rate limited"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_many_names_by_shortcode_and_spaces_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![3u8; 16]))
            .mount(&server)
            .await;

        let calls = Arc::new(AtomicUsize::new(0));
        let downloader = Downloader::new(
            None,
            vec![resolver(
                DownloadMethod::PageScrape,
                Ok(Some(format!("{}/clip.mp4", server.uri()))),
                &calls,
            )],
            fetcher(),
        )
        .with_spacing(Duration::from_millis(200), Duration::ZERO);

        let dir = tempfile::tempdir().unwrap();
        let urls = vec![
            "https://www.instagram.com/reel/AAA111/".to_string(),
            "https://www.instagram.com/p/BBB222/".to_string(),
        ];
        let started = std::time::Instant::now();
        let results = downloader.download_many(&urls, dir.path()).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[0].path, dir.path().join("AAA111.mp4"));
        assert_eq!(results[1].path, dir.path().join("BBB222.mp4"));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
