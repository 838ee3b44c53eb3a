//! First download step: hand the post to yt-dlp.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::media::io_error;
use crate::core::config::{instagram, timeouts, YTDL_BIN};
use crate::extract::ytdlp::{failure_from_output, run_ytdlp, session_cookie_file};
use crate::extract::{StrategyContext, StrategyError};

const FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Container extensions accepted as a finished download, in preference order
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "m4a"];

pub struct YtDlpDownloader {
    ctx: StrategyContext,
    bin: String,
    timeout: Duration,
}

impl YtDlpDownloader {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            bin: YTDL_BIN.clone(),
            timeout: timeouts::ytdlp_download(),
        }
    }

    pub fn with_binary(mut self, bin: impl Into<String>) -> Self {
        self.bin = bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(&self, url: &str, stem: &Path, cookies: Option<&Path>) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-f".into(),
            FORMAT.into(),
            "-o".into(),
            format!("{}.%(ext)s", stem.display()),
            "--no-playlist".into(),
            "--merge-output-format".into(),
            "mp4".into(),
            "--referer".into(),
            format!("{}/", instagram::BASE_URL),
            "--no-warnings".into(),
            "--socket-timeout".into(),
            "30".into(),
            "--retries".into(),
            "3".into(),
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
        args.push(url.to_string());
        args
    }

    /// Downloads `url` so that it ends up exactly at `destination`.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<u64, StrategyError> {
        let stem = destination.with_extension("");
        let cookies = session_cookie_file(self.ctx.session.as_ref()).await;
        let args = self.args(url, &stem, cookies.as_ref().map(|f| f.path()));

        log::info!("YtDlpDownloader: {} → {}", url, destination.display());
        let result = self.run(&args, &stem, destination).await;
        cleanup_siblings(&stem, destination).await;
        if result.is_err() {
            let _ = fs_err::tokio::remove_file(destination).await;
        }
        result
    }

    async fn run(&self, args: &[String], stem: &Path, destination: &Path) -> Result<u64, StrategyError> {
        let output = run_ytdlp(&self.bin, args, self.timeout).await?;
        if !output.status.success() {
            return Err(failure_from_output(&output));
        }

        let produced = find_output(stem)
            .await
            .ok_or_else(|| StrategyError::NotFound("yt-dlp finished without a media file".to_string()))?;
        if produced != destination {
            fs_err::tokio::rename(&produced, destination).await.map_err(io_error)?;
        }

        let size = fs_err::tokio::metadata(destination).await.map_err(io_error)?.len();
        if size == 0 {
            return Err(StrategyError::NotFound("yt-dlp produced an empty file".to_string()));
        }
        Ok(size)
    }
}

async fn find_output(stem: &Path) -> Option<PathBuf> {
    for ext in VIDEO_EXTENSIONS {
        let candidate = PathBuf::from(format!("{}.{}", stem.display(), ext));
        if fs_err::tokio::metadata(&candidate).await.is_ok() {
            return Some(candidate);
        }
    }
    None
}

/// Removes `<stem>.*` leftovers (`.part`, `.ytdl`, `.fNNN.*`, split audio) except the destination.
async fn cleanup_siblings(stem: &Path, destination: &Path) {
    let (Some(dir), Some(name)) = (stem.parent(), stem.file_name()) else {
        return;
    };
    let prefix = format!("{}.", name.to_string_lossy());
    let Ok(mut entries) = fs_err::tokio::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path == destination {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            log::debug!("YtDlpDownloader: removing leftover {}", path.display());
            let _ = fs_err::tokio::remove_file(&path).await;
        }
    }
}
