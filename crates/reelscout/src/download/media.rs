//! Streams a resolved media URL to disk.

use futures_util::StreamExt;
use reqwest::header::REFERER;
use reqwest::StatusCode;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::core::config::{instagram, timeouts};
use crate::core::error::AppResult;
use crate::core::http::{build_client, retry_after};
use crate::extract::StrategyError;
use crate::stealth::Proxy;

/// `<destination>.part`
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

pub(crate) fn io_error(e: std::io::Error) -> StrategyError {
    StrategyError::TransientNetwork(format!("io: {}", e))
}

/// Maps a non-success status to the strategy taxonomy.
pub(crate) fn status_error(status: StatusCode, headers: &reqwest::header::HeaderMap, url: &str) -> StrategyError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => StrategyError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::NOT_FOUND | StatusCode::GONE => StrategyError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StrategyError::AuthRequired(format!("HTTP {}", status)),
        s => StrategyError::TransientNetwork(format!("HTTP {} for {}", s, url)),
    }
}

#[derive(Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
}

impl MediaFetcher {
    pub fn new(user_agent: &str, proxy: Option<&Proxy>) -> AppResult<Self> {
        Ok(Self {
            client: build_client(user_agent, proxy, timeouts::media_fetch())?,
        })
    }

    /// Downloads `url` to `destination` through a `.part` file. Returns the byte count.
    ///
    /// Nothing is left at either path when the transfer fails.
    pub async fn fetch(&self, url: &str, destination: &Path) -> Result<u64, StrategyError> {
        let part = part_path(destination);
        let result = self.stream_to(url, &part).await;
        match result {
            Ok(0) => {
                let _ = fs_err::tokio::remove_file(&part).await;
                Err(StrategyError::NotFound(format!("empty media body from {}", url)))
            }
            Ok(bytes) => {
                fs_err::tokio::rename(&part, destination).await.map_err(io_error)?;
                log::info!("📥 MediaFetcher: {} bytes → {}", bytes, destination.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs_err::tokio::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, part: &Path) -> Result<u64, StrategyError> {
        let response = self
            .client
            .get(url)
            .header(REFERER, format!("{}/", instagram::BASE_URL))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers(), url));
        }

        let mut file = fs_err::tokio::File::create(part).await.map_err(io_error)?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io_error)?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;
        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> MediaFetcher {
        MediaFetcher::new("Mozilla/5.0 test", None).unwrap()
    }

    #[test]
    fn test_part_path() {
        assert_eq!(part_path(Path::new("/tmp/abc.mp4")), PathBuf::from("/tmp/abc.mp4.part"));
    }

    #[tokio::test]
    async fn test_fetch_streams_to_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v/clip.mp4"))
            .and(header("referer", "https://www.instagram.com/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abc.mp4");
        let bytes = fetcher()
            .fetch(&format!("{}/v/clip.mp4", server.uri()), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 4096);
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 4096);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abc.mp4");
        let err = fetcher()
            .fetch(&format!("{}/v/clip.mp4", server.uri()), &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, StrategyError::AuthRequired(_)));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_empty_body_is_not_a_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abc.mp4");
        let err = fetcher().fetch(&server.uri(), &dest).await.unwrap_err();

        assert!(matches!(err, StrategyError::NotFound(_)));
        assert!(!dest.exists());
    }
}
