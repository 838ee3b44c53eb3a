//! Official Graph API strategy.
//!
//! `EAA...` tokens talk to graph.facebook.com (hashtag search, business discovery);
//! `IG...` tokens talk to graph.instagram.com, which has no hashtag search.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::parse::{normalize_handle, normalize_tag, shortcode_from_url, Discovered};
use super::{ExtractionStrategy, StrategyError};
use crate::core::config::collection::MAX_PAGE_SIZE;
use crate::core::config::{instagram, timeouts, Settings};
use crate::core::error::AppResult;
use crate::core::http::build_client;
use crate::core::retry::{self, RetryConfig, Retryable};
use crate::core::types::{EngagementMetrics, SourceKind, SourceSpec, StrategyKind, VideoDescriptor};
use crate::stealth::proxy::Proxy;
use crate::stealth::HumanDelay;

const MEDIA_FIELDS: &str = "id,media_type,media_url,permalink,timestamp,caption,comments_count,like_count";
const RATE_LIMIT_CODES: &[i64] = &[4, 17, 32, 613];
const PERMISSION_CODES: &[i64] = &[10, 100, 200];
const INVALID_TOKEN_CODE: i64 = 190;
/// Own-media pages scanned when looking up a post's media URL
const MEDIA_LOOKUP_PAGES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphHost {
    Facebook,
    Instagram,
}

impl GraphHost {
    pub fn for_token(token: &str) -> Self {
        if token.starts_with("EAA") {
            GraphHost::Facebook
        } else {
            GraphHost::Instagram
        }
    }

    pub fn base_url(self) -> String {
        let host = match self {
            GraphHost::Facebook => instagram::GRAPH_FACEBOOK_HOST,
            GraphHost::Instagram => instagram::GRAPH_INSTAGRAM_HOST,
        };
        format!("{}/{}", host, instagram::GRAPH_API_VERSION)
    }
}

/// One failed call plus whether repeating it may help.
#[derive(Debug)]
struct CallFailure {
    error: StrategyError,
    retryable: bool,
}

impl Retryable for CallFailure {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

pub struct GraphApiClient {
    client: reqwest::Client,
    token: SecretString,
    host: GraphHost,
    base_url: String,
    configured_user_id: Option<String>,
    user_id: OnceCell<String>,
    retry: RetryConfig,
    delay: Option<Arc<HumanDelay>>,
}

impl GraphApiClient {
    pub fn new(token: SecretString, user_id: Option<String>, proxy: Option<&Proxy>) -> AppResult<Self> {
        let host = GraphHost::for_token(token.expose_secret());
        let client = build_client("reelscout/graph-api", proxy, timeouts::graph_api())?;
        Ok(Self {
            client,
            token,
            host,
            base_url: host.base_url(),
            configured_user_id: user_id,
            user_id: OnceCell::new(),
            retry: RetryConfig::graph_api(),
            delay: None,
        })
    }

    /// Redirects every call to `base_url` (mock servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Paces every call, page follows included.
    pub fn with_delay(mut self, delay: Arc<HumanDelay>) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Longest pacing wait before one call.
    pub fn pacing_ceiling(&self) -> Duration {
        self.delay.as_ref().map(|d| d.request_ceiling()).unwrap_or_default()
    }

    pub fn host(&self) -> GraphHost {
        self.host
    }

    /// GET `<base>/<path>` with the token, retrying 429/5xx with backoff.
    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, StrategyError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.get_url(&url, params).await
    }

    async fn get_url(&self, url: &str, params: &[(&str, String)]) -> Result<Value, StrategyError> {
        if let Some(delay) = &self.delay {
            delay.between_requests().await;
        }
        let carries_token = url.contains("access_token=") || params.iter().any(|(k, _)| *k == "access_token");
        let outcome = retry::retry(&self.retry, || async move {
            let mut request = self.client.get(url).query(params);
            if !carries_token {
                request = request.query(&[("access_token", self.token.expose_secret())]);
            }
            let response = request.send().await.map_err(|e| CallFailure {
                retryable: e.is_retryable(),
                error: StrategyError::from(e),
            })?;

            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if status.is_success() && body.get("error").is_none() {
                return Ok(body);
            }
            Err(CallFailure {
                error: classify_error(status, &body),
                retryable: retry::is_retryable_status(status),
            })
        })
        .await;

        outcome.into_result().map_err(|f| f.error)
    }

    /// Instagram business account id: configured, or the first one linked to the token's pages.
    pub async fn resolve_user_id(&self) -> Result<String, StrategyError> {
        if let Some(id) = &self.configured_user_id {
            return Ok(id.clone());
        }
        self.user_id
            .get_or_try_init(|| async {
                let id = match self.host {
                    GraphHost::Facebook => {
                        let body = self
                            .get("me/accounts", &[("fields", "id,name,instagram_business_account".to_string())])
                            .await?;
                        body.get("data")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten()
                            .find_map(|page| page.pointer("/instagram_business_account/id").and_then(Value::as_str))
                            .map(str::to_string)
                    }
                    GraphHost::Instagram => {
                        let body = self.get("me", &[("fields", "id,username".to_string())]).await?;
                        body.get("id").and_then(Value::as_str).map(str::to_string)
                    }
                };
                match id {
                    Some(id) => {
                        log::info!("OfficialGraphApi: resolved business account id {}", id);
                        Ok(id)
                    }
                    None => Err(StrategyError::AuthRequired(
                        "no Instagram business account linked to the token".to_string(),
                    )),
                }
            })
            .await
            .cloned()
    }

    pub async fn hashtag_id(&self, tag: &str) -> Result<String, StrategyError> {
        if self.host == GraphHost::Instagram {
            return Err(StrategyError::Unsupported(
                "hashtag search needs a Facebook (EAA) token".to_string(),
            ));
        }
        let user_id = self.resolve_user_id().await?;
        let body = self
            .get("ig_hashtag_search", &[("user_id", user_id), ("q", tag.to_string())])
            .await?;
        body.pointer("/data/0/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StrategyError::NotFound(format!("hashtag #{}", tag)))
    }

    /// Top then recent media of a hashtag, videos only, following `paging.next`.
    ///
    /// A failing edge or page ends the walk; what was gathered before it is
    /// returned, and the error surfaces only when nothing was.
    pub async fn hashtag_media(&self, tag: &str, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        let hashtag_id = self.hashtag_id(tag).await?;
        let user_id = self.resolve_user_id().await?;
        let mut found = Discovered::new(StrategyKind::OfficialGraphApi);
        let mut failure: Option<StrategyError> = None;

        'edges: for edge in ["top_media", "recent_media"] {
            let params = [
                ("user_id", user_id.clone()),
                ("fields", MEDIA_FIELDS.to_string()),
                ("limit", cap.min(MAX_PAGE_SIZE).to_string()),
            ];
            let mut page = match self.get(&format!("{}/{}", hashtag_id, edge), &params).await {
                Ok(page) => page,
                Err(e) => {
                    log::warn!("OfficialGraphApi: #{} {} failed: {}", tag, edge, e);
                    failure = Some(e);
                    break 'edges;
                }
            };
            loop {
                push_media_page(&page, &mut found);
                if found.len() >= cap {
                    break;
                }
                let Some(next) = page.pointer("/paging/next").and_then(Value::as_str).map(str::to_string) else {
                    break;
                };
                page = match self.get_url(&next, &[]).await {
                    Ok(page) => page,
                    Err(e) => {
                        log::warn!("OfficialGraphApi: #{} {} next page failed: {}", tag, edge, e);
                        failure = Some(e);
                        break 'edges;
                    }
                };
            }
            log::info!("OfficialGraphApi: #{} {} -> {} videos so far", tag, edge, found.len());
            if found.len() >= cap {
                break;
            }
        }

        keep_partial(found, cap, failure)
    }

    /// Media of another business/creator account through business discovery.
    pub async fn profile_media(&self, handle: &str, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        let user_id = self.resolve_user_id().await?;
        let mut found = Discovered::new(StrategyKind::OfficialGraphApi);
        let mut after: Option<String> = None;

        loop {
            let cursor = after.as_deref().map(|c| format!(".after({})", c)).unwrap_or_default();
            let fields = format!(
                "business_discovery.username({}){{media{}.limit({}){{{}}}}}",
                handle,
                cursor,
                cap.min(MAX_PAGE_SIZE),
                MEDIA_FIELDS
            );
            let body = match self.get(&user_id, &[("fields", fields)]).await {
                Ok(body) => body,
                Err(e) if !found.is_empty() => {
                    log::warn!("OfficialGraphApi: @{} next page failed: {}", handle, e);
                    break;
                }
                Err(e) => return Err(e),
            };
            let media = body
                .pointer("/business_discovery/media")
                .ok_or_else(|| StrategyError::NotFound(format!("@{} is not a business or creator account", handle)))?;

            let before = found.len();
            push_media_page(media, &mut found);
            after = media
                .pointer("/paging/cursors/after")
                .and_then(Value::as_str)
                .map(str::to_string);
            let has_next = media.pointer("/paging/next").is_some();
            if found.len() >= cap || !has_next || after.is_none() || found.len() == before {
                break;
            }
        }

        let mut items = found.into_vec();
        items.truncate(cap);
        Ok(items)
    }

    /// Direct media URL of one of the token owner's posts.
    pub async fn find_media_url(&self, shortcode: &str) -> Result<Option<String>, StrategyError> {
        let user_id = self.resolve_user_id().await?;
        let params = [
            ("fields", "id,media_type,media_url,permalink".to_string()),
            ("limit", MAX_PAGE_SIZE.to_string()),
        ];
        let mut page = self.get(&format!("{}/media", user_id), &params).await?;
        for _ in 0..MEDIA_LOOKUP_PAGES {
            let hit = page
                .get("data")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .find(|m| {
                    m.get("permalink").and_then(Value::as_str).and_then(shortcode_from_url).as_deref()
                        == Some(shortcode)
                })
                .and_then(|m| m.get("media_url").and_then(Value::as_str))
                .map(str::to_string);
            if hit.is_some() {
                return Ok(hit);
            }
            let Some(next) = page.pointer("/paging/next").and_then(Value::as_str).map(str::to_string) else {
                break;
            };
            page = self.get_url(&next, &[]).await?;
        }
        Ok(None)
    }

    /// Swaps a short-lived token for a long-lived one. Returns `(token, expires_in_secs)`.
    pub async fn exchange_token(&self, app_secret: &SecretString) -> Result<(SecretString, u64), StrategyError> {
        let body = self
            .get(
                "access_token",
                &[
                    ("grant_type", "ig_exchange_token".to_string()),
                    ("client_secret", app_secret.expose_secret().to_string()),
                ],
            )
            .await?;
        let token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| StrategyError::AuthRequired("unexpected token exchange response".to_string()))?;
        let expires_in = body.get("expires_in").and_then(Value::as_u64).unwrap_or(0);
        log::info!(
            "OfficialGraphApi: token exchanged, valid for {}s (~{} days)",
            expires_in,
            expires_in / 86_400
        );
        Ok((SecretString::from(token.to_string()), expires_in))
    }

    /// Token metadata (`data.is_valid`, `data.scopes`, ...). `app_token` is `<app_id>|<app_secret>`.
    pub async fn debug_token(&self, app_token: Option<&SecretString>) -> Result<Value, StrategyError> {
        let mut params = vec![("input_token", self.token.expose_secret().to_string())];
        if let Some(app_token) = app_token {
            params.push(("access_token", app_token.expose_secret().to_string()));
        }
        self.get("debug_token", &params).await
    }
}

/// Items gathered so far, or the failure that cut the walk short when there are none.
fn keep_partial(
    found: Discovered,
    cap: usize,
    failure: Option<StrategyError>,
) -> Result<Vec<VideoDescriptor>, StrategyError> {
    if let Some(e) = failure {
        if found.is_empty() {
            return Err(e);
        }
    }
    let mut items = found.into_vec();
    items.truncate(cap);
    Ok(items)
}

/// Adds the video media of one Graph API page.
fn push_media_page(page: &Value, found: &mut Discovered) {
    for media in page.get("data").and_then(Value::as_array).into_iter().flatten() {
        let media_type = media.get("media_type").and_then(Value::as_str).unwrap_or_default();
        if !matches!(media_type, "VIDEO" | "REELS") {
            continue;
        }
        let Some(permalink) = media.get("permalink").and_then(Value::as_str) else {
            continue;
        };
        let Some(code) = shortcode_from_url(permalink) else {
            continue;
        };

        let caption = media.get("caption").and_then(Value::as_str).map(str::to_string);
        let mut descriptor = VideoDescriptor::from_link(permalink, code, StrategyKind::OfficialGraphApi).with_metrics(
            EngagementMetrics {
                views: None,
                likes: media.get("like_count").and_then(Value::as_u64),
                comments: media.get("comments_count").and_then(Value::as_u64),
            },
        );
        descriptor.title = caption.as_deref().and_then(|c| c.lines().next()).map(str::to_string);
        descriptor.description = caption;
        found.push(descriptor);
    }
}

/// Maps a Graph API error payload to the strategy taxonomy.
fn classify_error(status: StatusCode, body: &Value) -> StrategyError {
    let error = body.get("error");
    let code = error.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let lower = message.to_lowercase();

    if let Some(code) = code {
        if PERMISSION_CODES.contains(&code) && lower.contains("permission") {
            log::error!("OfficialGraphApi: missing permission (code {}): {}", code, message);
            log::error!("OfficialGraphApi: hashtag and discovery endpoints need:");
            log::error!("   - App Review approval for \"Instagram Public Content Access\"");
            log::error!("   - the instagram_basic permission");
            log::error!("   - a Facebook user token (EAA...) linked to an Instagram business account");
            return StrategyError::AuthRequired(message);
        }
        if RATE_LIMIT_CODES.contains(&code) {
            return StrategyError::RateLimited { retry_after: None };
        }
        if code == INVALID_TOKEN_CODE {
            return StrategyError::AuthRequired(message);
        }
    }
    if lower.contains("does not exist") || status == StatusCode::NOT_FOUND {
        return StrategyError::NotFound(message);
    }
    match status.as_u16() {
        401 | 403 => StrategyError::AuthRequired(message),
        429 => StrategyError::RateLimited { retry_after: None },
        _ => StrategyError::TransientNetwork(format!("HTTP {}: {}", status, message)),
    }
}

pub struct OfficialGraphApi {
    api: Option<GraphApiClient>,
}

impl OfficialGraphApi {
    pub fn new(api: Option<GraphApiClient>) -> Self {
        Self { api }
    }

    /// Unconfigured (no `GRAPH_API_TOKEN`) instances report `Unsupported`.
    pub fn from_settings(settings: &Settings, proxy: Option<&Proxy>, delay: Arc<HumanDelay>) -> AppResult<Self> {
        let api = match &settings.graph_api_token {
            Some(token) => Some(
                GraphApiClient::new(token.clone(), settings.graph_api_user_id.clone(), proxy)?.with_delay(delay),
            ),
            None => None,
        };
        Ok(Self::new(api))
    }

    pub fn client(&self) -> Option<&GraphApiClient> {
        self.api.as_ref()
    }
}

#[async_trait]
impl ExtractionStrategy for OfficialGraphApi {
    fn kind(&self) -> StrategyKind {
        StrategyKind::OfficialGraphApi
    }

    fn supports(&self, kind: SourceKind) -> bool {
        !matches!(kind, SourceKind::UrlList)
    }

    fn budget(&self) -> Duration {
        let pacing = self.api.as_ref().map(GraphApiClient::pacing_ceiling).unwrap_or_default();
        (timeouts::graph_api() + pacing) * 3
    }

    async fn collect(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        let api = self
            .api
            .as_ref()
            .ok_or_else(|| StrategyError::Unsupported("GRAPH_API_TOKEN not configured".to_string()))?;

        match spec.kind.platform_kind() {
            SourceKind::Hashtag => {
                let tag = normalize_tag(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad hashtag {:?}", spec.identifier)))?;
                api.hashtag_media(&tag, cap).await
            }
            SourceKind::Profile => {
                let handle = normalize_handle(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad handle {:?}", spec.identifier)))?;
                api.profile_media(&handle, cap).await
            }
            other => Err(StrategyError::Unsupported(format!("{} sources", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: &str, user_id: Option<&str>) -> GraphApiClient {
        GraphApiClient::new(SecretString::from(token.to_string()), user_id.map(str::to_string), None)
            .unwrap()
            .with_base_url(server.uri())
            .with_retry(RetryConfig::new().max_retries(1).initial_delay(Duration::from_millis(5)).no_jitter())
    }

    fn media(code: &str, media_type: &str, likes: u64) -> Value {
        json!({
            "id": format!("id_{}", code),
            "media_type": media_type,
            "permalink": format!("https://www.instagram.com/reel/{}/", code),
            "caption": format!("caption {}", code),
            "like_count": likes,
            "comments_count": 1
        })
    }

    #[test]
    fn test_host_selection_by_token_prefix() {
        assert_eq!(GraphHost::for_token("EAAbc"), GraphHost::Facebook);
        assert_eq!(GraphHost::for_token("IGAATxyz"), GraphHost::Instagram);
        assert!(GraphHost::Facebook.base_url().ends_with("/v24.0"));
    }

    #[test]
    fn test_error_classification() {
        let perm = json!({"error": {"code": 10, "message": "Application does not have permission for this action"}});
        assert!(matches!(classify_error(StatusCode::BAD_REQUEST, &perm), StrategyError::AuthRequired(_)));

        let missing = json!({"error": {"code": 100, "message": "Object with ID 'x' does not exist"}});
        assert!(matches!(classify_error(StatusCode::BAD_REQUEST, &missing), StrategyError::NotFound(_)));

        let limited = json!({"error": {"code": 4, "message": "Application request limit reached"}});
        assert!(classify_error(StatusCode::BAD_REQUEST, &limited).is_rate_limited());

        assert!(matches!(
            classify_error(StatusCode::BAD_GATEWAY, &Value::Null),
            StrategyError::TransientNetwork(_)
        ));
    }

    #[tokio::test]
    async fn test_hashtag_media_pages_and_keeps_videos() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "page1"}, {"id": "page2", "instagram_business_account": {"id": "1789"}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ig_hashtag_search"))
            .and(query_param("q", "cats"))
            .and(query_param("user_id", "1789"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "h42"}]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/h42/top_media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [media("topVID001", "VIDEO", 10), media("topIMG002", "IMAGE", 99)],
                "paging": {"next": format!("{}/h42/top_media_page2?access_token=x", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/h42/top_media_page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [media("topVID003", "REELS", 5)]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/h42/recent_media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [media("topVID001", "VIDEO", 10), media("recVID004", "VIDEO", 1)]
            })))
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", None);
        let items = api.hashtag_media("cats", 10).await.unwrap();

        let ids: Vec<&str> = items.iter().map(|d| d.post_id.as_str()).collect();
        assert_eq!(ids, vec!["topVID001", "topVID003", "recVID004"]);
        assert_eq!(items[0].metrics.likes, Some(10));
        assert_eq!(items[0].strategy, StrategyKind::OfficialGraphApi);
    }

    async fn mount_hashtag(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/ig_hashtag_search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "h42"}]})))
            .mount(server)
            .await;
    }

    fn rate_limited() -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 4, "message": "Application request limit reached"}
        }))
    }

    #[tokio::test]
    async fn test_failed_recent_edge_keeps_top_media() {
        let server = MockServer::start().await;
        mount_hashtag(&server).await;
        Mock::given(method("GET"))
            .and(path("/h42/top_media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [media("topVID001", "VIDEO", 10), media("topVID002", "REELS", 7)]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/h42/recent_media"))
            .respond_with(rate_limited())
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", Some("1789"));
        let items = api.hashtag_media("cats", 10).await.unwrap();

        let ids: Vec<&str> = items.iter().map(|d| d.post_id.as_str()).collect();
        assert_eq!(ids, vec!["topVID001", "topVID002"]);
    }

    #[tokio::test]
    async fn test_failed_next_page_keeps_first_page() {
        let server = MockServer::start().await;
        mount_hashtag(&server).await;
        Mock::given(method("GET"))
            .and(path("/h42/top_media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [media("topVID001", "VIDEO", 10)],
                "paging": {"next": format!("{}/h42/top_media_page2?access_token=x", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/h42/top_media_page2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/h42/recent_media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [media("recVID004", "VIDEO", 1)]})))
            .expect(0)
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", Some("1789"));
        let items = api.hashtag_media("cats", 10).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].post_id, "topVID001");
    }

    #[tokio::test]
    async fn test_failure_with_nothing_found_is_an_error() {
        let server = MockServer::start().await;
        mount_hashtag(&server).await;
        Mock::given(method("GET"))
            .and(path("/h42/top_media"))
            .respond_with(rate_limited())
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", Some("1789"));
        let err = api.hashtag_media("cats", 10).await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_profile_later_page_failure_keeps_earlier_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1789"))
            .and(query_param(
                "fields",
                format!("business_discovery.username(examplepage){{media.limit(5){{{}}}}}", MEDIA_FIELDS),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "business_discovery": {"media": {
                    "data": [media("bizVID001", "VIDEO", 3)],
                    "paging": {"cursors": {"after": "c1"}, "next": "https://graph.example/next"}
                }}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/1789"))
            .and(query_param(
                "fields",
                format!("business_discovery.username(examplepage){{media.after(c1).limit(5){{{}}}}}", MEDIA_FIELDS),
            ))
            .respond_with(rate_limited())
            .expect(1)
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", Some("1789"));
        let items = api.profile_media("examplepage", 5).await.unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].post_id, "bizVID001");
    }

    #[tokio::test]
    async fn test_calls_are_paced() {
        let server = MockServer::start().await;
        mount_hashtag(&server).await;
        let delay = Arc::new(HumanDelay::new(
            Arc::new(crate::stealth::UserAgentPool::fallback()),
            crate::stealth::DelayPolicy {
                request: (0.2, 0.2),
                extra_pause_probability: 0.0,
                ..crate::stealth::DelayPolicy::default()
            },
        ));
        let api = client(&server, "EAAtoken", Some("1789")).with_delay(delay);
        assert_eq!(api.pacing_ceiling(), Duration::from_millis(200));

        let started = std::time::Instant::now();
        assert_eq!(api.hashtag_id("cats").await.unwrap(), "h42");
        assert_eq!(api.hashtag_id("cats").await.unwrap(), "h42");
        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_hashtag_with_instagram_token_is_unsupported() {
        let server = MockServer::start().await;
        let strategy = OfficialGraphApi::new(Some(client(&server, "IGAATtoken", Some("1"))));
        let spec = SourceSpec::builder().kind(SourceKind::Hashtag).identifier("#cats").build();
        let err = strategy.collect(&spec, 5).await.unwrap_err();
        assert!(matches!(err, StrategyError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_permission_error_is_auth_required() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ig_hashtag_search"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 10, "message": "(#10) Application does not have permission for this action"}
            })))
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", Some("1789"));
        let err = api.hashtag_media("cats", 5).await.unwrap_err();
        assert!(matches!(err, StrategyError::AuthRequired(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/accounts"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let api = client(&server, "EAAtoken", None);
        let err = api.resolve_user_id().await.unwrap_err();
        assert!(matches!(err, StrategyError::TransientNetwork(_)));
    }

    #[tokio::test]
    async fn test_profile_via_business_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1789"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "business_discovery": {"media": {"data": [
                    media("bizVID001", "VIDEO", 3), media("bizVID002", "REELS", 4), media("bizVID003", "VIDEO", 5)
                ]}}
            })))
            .mount(&server)
            .await;

        let strategy = OfficialGraphApi::new(Some(client(&server, "EAAtoken", Some("1789"))));
        let spec = SourceSpec::builder().kind(SourceKind::Reels).identifier("@examplepage").build();
        let items = strategy.collect(&spec, 2).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].post_id, "bizVID002");
    }

    #[tokio::test]
    async fn test_unconfigured_is_unsupported() {
        let strategy = OfficialGraphApi::new(None);
        let spec = SourceSpec::builder().kind(SourceKind::Hashtag).identifier("cats").build();
        assert!(matches!(
            strategy.collect(&spec, 5).await,
            Err(StrategyError::Unsupported(_))
        ));
    }
}
