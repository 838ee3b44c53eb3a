//! Plain HTTP GET of public pages, parsed with the shared link extractor.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::StatusCode;
use std::time::Duration;

use super::parse::{
    canonical_post_url, extract_from_html, normalize_handle, normalize_tag, shortcode_from_url, split_url_list, Discovered,
};
use super::{ExtractionStrategy, StrategyContext, StrategyError};
use crate::core::config::{instagram, timeouts};
use crate::core::http::{build_client, is_login_redirect, retry_after};
use crate::core::types::{SourceKind, SourceSpec, StrategyKind, VideoDescriptor};

pub struct DirectHttp {
    ctx: StrategyContext,
    base_url: String,
}

impl DirectHttp {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            base_url: instagram::BASE_URL.to_string(),
        }
    }

    /// Fetches pages from another host (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Page URLs to fetch for a source.
    fn target_urls(&self, spec: &SourceSpec) -> Result<Vec<String>, StrategyError> {
        match spec.kind {
            SourceKind::Profile | SourceKind::Reels => {
                let handle = normalize_handle(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad handle {:?}", spec.identifier)))?;
                let suffix = if spec.kind == SourceKind::Reels { "reels/" } else { "" };
                Ok(vec![format!("{}/{}/{}", self.base_url, handle, suffix)])
            }
            SourceKind::Hashtag | SourceKind::Keyword => {
                let tag = normalize_tag(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad hashtag {:?}", spec.identifier)))?;
                Ok(vec![format!("{}/explore/tags/{}/", self.base_url, tag)])
            }
            SourceKind::UrlList => {
                let urls: Vec<String> = split_url_list(&spec.identifier)
                    .iter()
                    .filter_map(|u| url::Url::parse(u).ok())
                    .map(|u| format!("{}{}", self.base_url, u.path()))
                    .collect();
                if urls.is_empty() {
                    return Err(StrategyError::NotFound("no post URLs in list".to_string()));
                }
                Ok(urls)
            }
        }
    }

    /// One paced GET with the current UA, a rotated proxy and the session cookies.
    async fn fetch(&self, url: &str) -> Result<String, StrategyError> {
        self.ctx.delay.between_requests().await;
        if !self.ctx.window.acquire() {
            log::warn!("DirectHttp: hourly request window is full");
            return Err(StrategyError::RateLimited {
                retry_after: self.ctx.window.retry_after(),
            });
        }

        let proxy = self.ctx.proxies.next();
        let user_agent = self.ctx.delay.current_user_agent();
        let client = build_client(&user_agent, proxy.as_ref(), timeouts::http_request())
            .map_err(|e| StrategyError::TransientNetwork(e.to_string()))?;

        let mut request = client.get(url);
        if let Some(session) = &self.ctx.session {
            request = request.header(COOKIE, session.cookie_header());
        }

        log::info!(
            "DirectHttp: GET {} (proxy={}, session={})",
            url,
            proxy.as_ref().map(|p| p.redacted()).unwrap_or_else(|| "direct".to_string()),
            self.ctx.session.is_some()
        );

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                if let Some(p) = &proxy {
                    self.ctx.proxies.record_failure(p);
                }
                return Err(StrategyError::from(e));
            }
        };
        if let Some(p) = &proxy {
            self.ctx.proxies.record_success(p);
        }

        if is_login_redirect(response.url()) {
            log::warn!("DirectHttp: redirected to login wall");
            return Err(StrategyError::AuthRequired(format!("login redirect for {}", url)));
        }

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(StrategyError::RateLimited {
                    retry_after: retry_after(response.headers()),
                })
            }
            StatusCode::NOT_FOUND => return Err(StrategyError::NotFound(url.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(StrategyError::AuthRequired(format!("HTTP {}", status)))
            }
            s if !s.is_success() => return Err(StrategyError::TransientNetwork(format!("HTTP {} for {}", s, url))),
            _ => {}
        }

        let body = response.text().await.map_err(StrategyError::from)?;
        if body.to_lowercase().contains("please wait a few minutes") {
            return Err(StrategyError::RateLimited { retry_after: None });
        }
        Ok(body)
    }
}

#[async_trait]
impl ExtractionStrategy for DirectHttp {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectHttp
    }

    fn supports(&self, _kind: SourceKind) -> bool {
        true
    }

    fn budget(&self) -> Duration {
        (timeouts::http_request() + self.ctx.delay.request_ceiling()) * 4
    }

    async fn collect(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        let urls = self.target_urls(spec)?;
        let mut found = Discovered::new(StrategyKind::DirectHttp);

        if spec.kind == SourceKind::UrlList {
            let mut last_error = None;
            for url in &urls {
                if found.len() >= cap {
                    break;
                }
                let Some(code) = shortcode_from_url(url) else { continue };
                match self.fetch(url).await {
                    Ok(html) => {
                        // keep the requested post only; pages also link to related posts
                        let descriptor = extract_from_html(&html, StrategyKind::DirectHttp)
                            .into_iter()
                            .find(|d| d.post_id == code)
                            .unwrap_or_else(|| {
                                let kind = if url.contains("/reel") { "reel" } else { "p" };
                                VideoDescriptor::from_link(
                                    canonical_post_url(kind, &code),
                                    code.clone(),
                                    StrategyKind::DirectHttp,
                                )
                            });
                        found.push(descriptor);
                    }
                    Err(e) if e.is_rate_limited() || matches!(e, StrategyError::AuthRequired(_)) => return Err(e),
                    Err(e) => {
                        log::warn!("DirectHttp: {} failed: {}", url, e);
                        last_error = Some(e);
                    }
                }
            }
            return match (found.is_empty(), last_error) {
                (true, Some(e)) => Err(e),
                _ => Ok(found.into_vec()),
            };
        }

        for url in &urls {
            let html = self.fetch(url).await?;
            for descriptor in extract_from_html(&html, StrategyKind::DirectHttp) {
                found.push(descriptor);
            }
        }

        log::info!("DirectHttp: {} posts discovered for {}", found.len(), spec.identifier);
        let mut items = found.into_vec();
        items.truncate(cap);
        Ok(items)
    }
}
