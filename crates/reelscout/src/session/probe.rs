//! Session liveness probe.

use reqwest::header::COOKIE;
use reqwest::StatusCode;

use super::SessionState;
use crate::core::config::{instagram, timeouts};
use crate::core::error::AppResult;
use crate::core::http::{api_headers, build_client, is_login_redirect};
use crate::stealth::proxy::Proxy;

/// Identity reported when the home page proves the session but not who owns it.
pub const UNKNOWN_IDENTITY: &str = "unknown";

pub struct SessionProbe {
    client: reqwest::Client,
    base_url: String,
}

impl SessionProbe {
    pub fn new(user_agent: &str, proxy: Option<&Proxy>) -> AppResult<Self> {
        Ok(Self {
            client: build_client(user_agent, proxy, timeouts::http_request())?,
            base_url: instagram::BASE_URL.to_string(),
        })
    }

    /// Points the probe at another host (mock servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Logged-in username, `"unknown"` when only the home page confirms the session,
    /// `None` when the session is dead or the probe could not run.
    pub async fn probe_liveness(&self, state: &SessionState) -> Option<String> {
        if !state.has_session_cookie() {
            return None;
        }

        match self.viewer_username(state).await {
            ViewerCheck::Username(name) => return Some(name),
            ViewerCheck::LoggedOut => {
                log::info!("SessionProbe: {} is logged out", state.account);
                return None;
            }
            ViewerCheck::Inconclusive => {}
        }

        let url = format!("{}/", self.base_url);
        let response = match self.client.get(&url).header(COOKIE, state.cookie_header()).send().await {
            Ok(r) => r,
            Err(e) => {
                log::warn!("SessionProbe: home page request failed: {}", e);
                return None;
            }
        };
        if response.status() == StatusCode::OK && !is_login_redirect(response.url()) {
            Some(UNKNOWN_IDENTITY.to_string())
        } else {
            log::info!(
                "SessionProbe: home page answered {} at {}",
                response.status(),
                response.url().path()
            );
            None
        }
    }

    async fn viewer_username(&self, state: &SessionState) -> ViewerCheck {
        let url = format!("{}{}", self.base_url, instagram::SHARED_DATA_PATH);
        let response = match self
            .client
            .get(&url)
            .headers(api_headers(state.csrf_token()))
            .header(COOKIE, state.cookie_header())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                log::debug!("SessionProbe: shared_data request failed: {}", e);
                return ViewerCheck::Inconclusive;
            }
        };

        if !response.status().is_success() || is_login_redirect(response.url()) {
            return ViewerCheck::Inconclusive;
        }
        let Ok(json) = response.json::<serde_json::Value>().await else {
            return ViewerCheck::Inconclusive;
        };

        match json.pointer("/config/viewer") {
            Some(serde_json::Value::Null) => ViewerCheck::LoggedOut,
            Some(viewer) => viewer
                .get("username")
                .and_then(|u| u.as_str())
                .filter(|u| !u.is_empty())
                .map(|u| ViewerCheck::Username(u.to_string()))
                .unwrap_or(ViewerCheck::Inconclusive),
            None => ViewerCheck::Inconclusive,
        }
    }
}

enum ViewerCheck {
    Username(String),
    LoggedOut,
    Inconclusive,
}
