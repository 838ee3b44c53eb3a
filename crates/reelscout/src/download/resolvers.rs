//! Fallback sources of a direct media URL, tried after yt-dlp.

use async_trait::async_trait;
use lazy_regex::regex;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use select::document::Document;
use select::predicate::{Attr, Name, Predicate};
use serde_json::Value;

use super::media::status_error;
use super::DownloadMethod;
use crate::core::config::{instagram, timeouts};
use crate::core::http::{api_headers, build_client, is_login_redirect};
use crate::extract::browser::{BrowserDriver, BrowserLauncher, DriverGuard, LaunchSettings};
use crate::extract::graph_api::GraphApiClient;
use crate::extract::parse::{json_after, str_at};
use crate::extract::{StrategyContext, StrategyError};

/// One way of turning a post into a downloadable media URL.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    fn method(&self) -> DownloadMethod;

    /// `Ok(None)` when this source knows the post but has no video for it.
    async fn resolve(&self, post_url: &str, shortcode: &str) -> Result<Option<String>, StrategyError>;
}

/// Undoes the escaping media URLs carry inside HTML and embedded JSON.
pub fn unescape_media_url(raw: &str) -> String {
    raw.replace("\\u0026", "&")
        .replace("&amp;", "&")
        .replace("\\/", "/")
}

/// Finds a video URL in a post page: embedded shared data, JSON-LD, inline JSON keys, then Open Graph tags.
pub fn media_url_from_page(html: &str) -> Option<String> {
    if let Some(data) = json_after(html, regex!(r"window\._sharedData\s*=\s*")) {
        let found = str_at(
            &data,
            &[
                "/entry_data/PostPage/0/graphql/shortcode_media/video_url",
                "/entry_data/PostPage/0/items/0/video_versions/0/url",
            ],
        );
        if let Some(url) = found {
            return Some(unescape_media_url(url));
        }
    }

    let inline = [
        regex!(r#""contentUrl"\s*:\s*"([^"]+)""#),
        regex!(r#""video_url"\s*:\s*"([^"]+)""#),
        regex!(r#""videoUrl"\s*:\s*"([^"]+)""#),
    ];
    for pattern in inline {
        if let Some(caps) = pattern.captures(html) {
            return Some(unescape_media_url(&caps[1]));
        }
    }

    let doc = Document::from(html);
    for property in ["og:video", "og:video:secure_url"] {
        let content = doc
            .find(Name("meta").and(Attr("property", property)))
            .find_map(|meta| meta.attr("content"))
            .filter(|c| !c.is_empty());
        if let Some(url) = content {
            return Some(unescape_media_url(url));
        }
    }
    None
}

/// Video URL in a media info or GraphQL payload.
fn media_url_from_json(body: &Value) -> Option<String> {
    str_at(
        body,
        &[
            "/items/0/video_versions/0/url",
            "/data/shortcode_media/video_url",
            "/data/xdt_shortcode_media/video_url",
            "/data/shortcode_media/video_versions/0/url",
            "/data/xdt_shortcode_media/video_versions/0/url",
        ],
    )
    .map(unescape_media_url)
}

fn csrf_from_set_cookie(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let pair = cookie.split(';').next()?.trim();
            let (name, value) = pair.split_once('=')?;
            (name == "csrftoken" && !value.is_empty()).then(|| value.to_string())
        })
}

/// Requests against the platform's web endpoints with the run's UA, proxy, session and window.
#[derive(Clone)]
pub struct WebAccess {
    ctx: StrategyContext,
    base_url: String,
}

impl WebAccess {
    pub fn new(ctx: StrategyContext) -> Self {
        Self {
            ctx,
            base_url: instagram::BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Paced client carrying the agent in use after the wait.
    async fn client(&self) -> Result<reqwest::Client, StrategyError> {
        self.ctx.delay.between_requests().await;
        if !self.ctx.window.acquire() {
            return Err(StrategyError::RateLimited {
                retry_after: self.ctx.window.retry_after(),
            });
        }
        let proxy = self.ctx.proxies.next();
        build_client(&self.ctx.delay.current_user_agent(), proxy.as_ref(), timeouts::http_request())
            .map_err(|e| StrategyError::TransientNetwork(e.to_string()))
    }

    fn with_session(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.ctx.session {
            Some(session) => request.header(COOKIE, session.cookie_header()),
            None => request,
        }
    }

    async fn checked(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, StrategyError> {
        let response = self.with_session(request).send().await?;
        if is_login_redirect(response.url()) {
            return Err(StrategyError::AuthRequired(format!("login redirect for {}", url)));
        }
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response.headers(), url));
        }
        Ok(response)
    }

    async fn page(&self, url: &str) -> Result<String, StrategyError> {
        let client = self.client().await?;
        let response = self.checked(client.get(url), url).await?;
        Ok(response.text().await?)
    }

    async fn api_json(&self, url: &str) -> Result<Value, StrategyError> {
        let client = self.client().await?;
        let csrf = self.ctx.session.as_ref().and_then(|s| s.csrf_token());
        let request = client.get(url).headers(api_headers(csrf));
        let response = self.checked(request, url).await?;
        Ok(response.json().await?)
    }

    async fn post_form(&self, url: &str, body: String, csrf: Option<&str>) -> Result<Value, StrategyError> {
        let client = self.client().await?;
        let request = client
            .post(url)
            .headers(api_headers(csrf))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        let response = self.checked(request, url).await?;
        Ok(response.json().await?)
    }

    /// Session CSRF token, else the one the home page sets.
    async fn csrf_token(&self) -> Option<String> {
        if let Some(token) = self.ctx.session.as_ref().and_then(|s| s.csrf_token()) {
            return Some(token.to_string());
        }
        let client = self.client().await.ok()?;
        let home = format!("{}/", self.base_url);
        let response = self.with_session(client.get(&home)).send().await.ok()?;
        csrf_from_set_cookie(response.headers())
    }
}

/// Graph API `media_url` of one of the token owner's posts.
pub struct GraphApiMedia {
    api: GraphApiClient,
}

impl GraphApiMedia {
    pub fn new(api: GraphApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MediaResolver for GraphApiMedia {
    fn method(&self) -> DownloadMethod {
        DownloadMethod::GraphApi
    }

    async fn resolve(&self, _post_url: &str, shortcode: &str) -> Result<Option<String>, StrategyError> {
        self.api.find_media_url(shortcode).await
    }
}

/// `api/v1/media/<shortcode>/info/`
pub struct MediaInfoEndpoint {
    web: WebAccess,
}

impl MediaInfoEndpoint {
    pub fn new(web: WebAccess) -> Self {
        Self { web }
    }
}

#[async_trait]
impl MediaResolver for MediaInfoEndpoint {
    fn method(&self) -> DownloadMethod {
        DownloadMethod::MediaInfo
    }

    async fn resolve(&self, _post_url: &str, shortcode: &str) -> Result<Option<String>, StrategyError> {
        let url = format!("{}/api/v1/media/{}/info/", self.web.base_url, shortcode);
        let body = self.web.api_json(&url).await?;
        Ok(media_url_from_json(&body))
    }
}

/// Web GraphQL endpoint; the document ids rotate, so several are tried.
pub struct GraphQlEndpoint {
    web: WebAccess,
    doc_ids: Vec<String>,
}

impl GraphQlEndpoint {
    pub fn new(web: WebAccess) -> Self {
        Self {
            web,
            doc_ids: instagram::GRAPHQL_DOC_IDS.iter().map(|d| d.to_string()).collect(),
        }
    }

    pub fn with_doc_ids(mut self, doc_ids: Vec<String>) -> Self {
        self.doc_ids = doc_ids;
        self
    }
}

#[async_trait]
impl MediaResolver for GraphQlEndpoint {
    fn method(&self) -> DownloadMethod {
        DownloadMethod::GraphQl
    }

    async fn resolve(&self, _post_url: &str, shortcode: &str) -> Result<Option<String>, StrategyError> {
        let csrf = self.web.csrf_token().await;
        if csrf.is_none() {
            log::warn!("GraphQlEndpoint: no CSRF token, trying without");
        }
        let url = format!("{}{}", self.web.base_url, instagram::GRAPHQL_PATH);
        let variables = serde_json::json!({ "shortcode": shortcode }).to_string();

        let mut last_error = None;
        for doc_id in &self.doc_ids {
            let body = format!("doc_id={}&variables={}", doc_id, urlencoding::encode(&variables));
            match self.web.post_form(&url, body, csrf.as_deref()).await {
                Ok(payload) => {
                    if let Some(found) = media_url_from_json(&payload) {
                        return Ok(Some(found));
                    }
                    if let Some(message) = payload.get("message").and_then(Value::as_str) {
                        log::warn!("GraphQlEndpoint: doc_id {} rejected: {}", doc_id, message);
                    }
                }
                Err(e) if e.is_rate_limited() || matches!(e, StrategyError::AuthRequired(_)) => return Err(e),
                Err(e) => {
                    log::warn!("GraphQlEndpoint: doc_id {} failed: {}", doc_id, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// Plain GET of the post page, scanned for a media URL.
pub struct PostPage {
    web: WebAccess,
}

impl PostPage {
    pub fn new(web: WebAccess) -> Self {
        Self { web }
    }
}

#[async_trait]
impl MediaResolver for PostPage {
    fn method(&self) -> DownloadMethod {
        DownloadMethod::PageScrape
    }

    async fn resolve(&self, post_url: &str, _shortcode: &str) -> Result<Option<String>, StrategyError> {
        let url = match url::Url::parse(post_url) {
            Ok(parsed) => format!("{}{}", self.web.base_url, parsed.path()),
            Err(_) => post_url.to_string(),
        };
        let html = self.web.page(&url).await?;
        Ok(media_url_from_page(&html))
    }
}

const VIDEO_SRC_SCRIPT: &str = "(() => { const v = document.querySelector('video'); return v ? (v.currentSrc || v.src || '') : ''; })()";

/// Renders the post in a real browser and reads the `<video>` element.
pub struct RenderedPage {
    ctx: StrategyContext,
    launchers: Vec<Box<dyn BrowserLauncher>>,
}

impl RenderedPage {
    pub fn new(ctx: StrategyContext, launchers: Vec<Box<dyn BrowserLauncher>>) -> Self {
        Self { ctx, launchers }
    }

    async fn find_video(&self, page: &mut dyn BrowserDriver, post_url: &str) -> Result<Option<String>, StrategyError> {
        if let Some(session) = &self.ctx.session {
            page.set_cookies(&session.cookies).await?;
        }
        tokio::time::timeout(timeouts::page_load(), page.goto(post_url))
            .await
            .map_err(|_| StrategyError::Timeout)??;
        let settle = timeouts::PAGE_SETTLE_SECS as f64;
        self.ctx.delay.pause(settle, settle + 1.0).await;

        let src = page.evaluate(VIDEO_SRC_SCRIPT).await?;
        if let Some(src) = src.as_str().filter(|s| s.starts_with("http")) {
            return Ok(Some(src.to_string()));
        }
        let html = page.content().await?;
        Ok(media_url_from_page(&html))
    }
}

#[async_trait]
impl MediaResolver for RenderedPage {
    fn method(&self) -> DownloadMethod {
        DownloadMethod::Browser
    }

    async fn resolve(&self, post_url: &str, _shortcode: &str) -> Result<Option<String>, StrategyError> {
        if self.launchers.is_empty() {
            return Err(StrategyError::Unsupported("no browser engine compiled in".to_string()));
        }
        let settings = LaunchSettings {
            user_agent: self.ctx.delay.current_user_agent(),
            proxy: self.ctx.proxies.next(),
            page_load: timeouts::page_load(),
        };

        let mut last_error = StrategyError::Unsupported("no browser engine launched".to_string());
        for launcher in &self.launchers {
            let driver = match launcher.launch(&settings).await {
                Ok(driver) => driver,
                Err(e) => {
                    log::warn!("RenderedPage: {} failed to launch: {}", launcher.engine(), e);
                    last_error = e;
                    continue;
                }
            };
            let mut guard = DriverGuard::new(driver);
            let result = self.find_video(guard.page(), post_url).await;
            guard.close().await;
            match result {
                Ok(found) => return Ok(found),
                Err(e) => {
                    log::warn!("RenderedPage: {} failed: {}", launcher.engine(), e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use crate::stealth::{DelayPolicy, HumanDelay, ProxyRotator, RequestWindow, UserAgentPool};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(session: Option<SessionState>) -> StrategyContext {
        StrategyContext {
            delay: Arc::new(HumanDelay::new(Arc::new(UserAgentPool::fallback()), DelayPolicy::instant())),
            proxies: Arc::new(ProxyRotator::direct()),
            session,
            window: Arc::new(RequestWindow::default()),
        }
    }

    fn web(server: &MockServer, session: Option<SessionState>) -> WebAccess {
        WebAccess::new(context(session)).with_base_url(server.uri())
    }

    fn session() -> SessionState {
        let mut cookies = BTreeMap::new();
        cookies.insert("sessionid".to_string(), "s1".to_string());
        cookies.insert("csrftoken".to_string(), "tok".to_string());
        SessionState::new("alice", cookies)
    }

    #[test]
    fn test_media_url_from_page_sources() {
        let shared = r#"<script>window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{"video_url":"https:\/\/cdn.example\/a.mp4?x=1&y=2"}}}]}};</script>"#;
        assert_eq!(
            media_url_from_page(shared).as_deref(),
            Some("https://cdn.example/a.mp4?x=1&y=2")
        );

        let ld = r#"<script type="application/ld+json">{"@type":"VideoObject","contentUrl":"https://cdn.example/b.mp4"}</script>"#;
        assert_eq!(media_url_from_page(ld).as_deref(), Some("https://cdn.example/b.mp4"));

        let og = r#"<html><head><meta property="og:video:secure_url" content="https://cdn.example/c.mp4?a=1&amp;b=2"></head></html>"#;
        assert_eq!(media_url_from_page(og).as_deref(), Some("https://cdn.example/c.mp4?a=1&b=2"));

        assert_eq!(media_url_from_page("<html><body>photo post</body></html>"), None);
    }

    #[test]
    fn test_csrf_from_set_cookie() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.append(SET_COOKIE, "mid=abc; Path=/".parse().unwrap());
        headers.append(SET_COOKIE, "csrftoken=xyz; Path=/; Secure".parse().unwrap());
        assert_eq!(csrf_from_set_cookie(&headers).as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_media_info_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/media/abc123/info/"))
            .and(header("x-ig-app-id", instagram::IG_APP_ID))
            .and(header("x-csrftoken", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"video_versions": [{"url": "https://cdn.example/info.mp4"}]}]
            })))
            .mount(&server)
            .await;

        let resolver = MediaInfoEndpoint::new(web(&server, Some(session())));
        let url = resolver
            .resolve("https://www.instagram.com/reel/abc123/", "abc123")
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://cdn.example/info.mp4"));
    }

    #[tokio::test]
    async fn test_graphql_tries_next_doc_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "csrftoken=home; Path=/"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql/query/"))
            .and(body_string_contains("doc_id=111"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "execution error", "status": "fail"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql/query/"))
            .and(body_string_contains("doc_id=222"))
            .and(header("x-csrftoken", "home"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"xdt_shortcode_media": {"video_url": "https://cdn.example/gql.mp4"}}
            })))
            .mount(&server)
            .await;

        let resolver = GraphQlEndpoint::new(web(&server, None)).with_doc_ids(vec!["111".into(), "222".into()]);
        let url = resolver
            .resolve("https://www.instagram.com/reel/abc123/", "abc123")
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://cdn.example/gql.mp4"));
    }

    #[tokio::test]
    async fn test_post_page_login_wall() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/reel/abc123/"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/accounts/login/?next=/reel/abc123/"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/login/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let resolver = PostPage::new(web(&server, None));
        let err = resolver
            .resolve("https://www.instagram.com/reel/abc123/", "abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn test_rendered_page_without_engines() {
        let resolver = RenderedPage::new(context(None), Vec::new());
        let err = resolver
            .resolve("https://www.instagram.com/reel/abc123/", "abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, StrategyError::Unsupported(_)));
    }
}
