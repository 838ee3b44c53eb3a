//! HTTP client construction shared by every strategy that talks to the platform directly.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use std::time::Duration;

use crate::core::config::instagram;
use crate::core::error::{AppError, AppResult};
use crate::stealth::proxy::Proxy;

/// Builds a client with the given UA, optional proxy and request timeout.
///
/// Redirects are followed (reqwest default, up to 10) so callers can inspect
/// `response.url()` for login-wall redirects.
pub fn build_client(user_agent: &str, proxy: Option<&Proxy>, timeout: Duration) -> AppResult<reqwest::Client> {
    let mut client_builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(browser_headers())
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(15));

    if let Some(proxy) = proxy {
        match reqwest::Proxy::all(proxy.to_url()) {
            Ok(p) => client_builder = client_builder.proxy(p),
            Err(e) => log::warn!("HTTP client: failed to configure proxy {}: {}", proxy, e),
        }
    }

    client_builder.build().map_err(AppError::Http)
}

/// Header set of a desktop browser navigating from the platform's home page.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.instagram.com/"));
    headers.insert(
        HeaderName::from_static("upgrade-insecure-requests"),
        HeaderValue::from_static("1"),
    );
    headers.insert(HeaderName::from_static("sec-fetch-dest"), HeaderValue::from_static("document"));
    headers.insert(HeaderName::from_static("sec-fetch-mode"), HeaderValue::from_static("navigate"));
    headers.insert(HeaderName::from_static("sec-fetch-site"), HeaderValue::from_static("same-origin"));
    headers
}

/// Extra headers for the web JSON endpoints (`/api/v1/...`, GraphQL).
pub fn api_headers(csrf_token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        HeaderName::from_static("x-ig-app-id"),
        HeaderValue::from_static(instagram::IG_APP_ID),
    );
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );
    if let Some(token) = csrf_token.and_then(|t| HeaderValue::from_str(t).ok()) {
        headers.insert(HeaderName::from_static("x-csrftoken"), token);
    }
    headers
}

/// `Retry-After` in seconds, when the server sent one.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// True when the platform bounced us to its login wall.
pub fn is_login_redirect(url: &reqwest::Url) -> bool {
    url.path().starts_with("/accounts/login")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_redirect_detection() {
        let url = reqwest::Url::parse("https://www.instagram.com/accounts/login/?next=/cats/").unwrap();
        assert!(is_login_redirect(&url));
        let url = reqwest::Url::parse("https://www.instagram.com/cats/").unwrap();
        assert!(!is_login_redirect(&url));
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_api_headers_carry_app_id_and_csrf() {
        let headers = api_headers(Some("tok"));
        assert_eq!(headers["x-ig-app-id"], instagram::IG_APP_ID);
        assert_eq!(headers["x-csrftoken"], "tok");
        assert!(!api_headers(None).contains_key("x-csrftoken"));
    }
}
