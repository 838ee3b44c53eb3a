//! Netscape cookie file format (`cookies.txt`), shared with yt-dlp.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;

use super::SessionState;
use crate::core::error::AppResult;

const PLATFORM_DOMAIN: &str = "instagram.com";
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCookie {
    pub domain: String,
    pub name: String,
    pub value: String,
    pub expires: Option<i64>, // Unix timestamp, 0 means session cookie
    pub secure: bool,
}

impl ParsedCookie {
    /// Check if cookie is expired
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(0) | None => false,
            Some(ts) => ts < Utc::now().timestamp(),
        }
    }

    /// Show only first and last few chars
    pub fn masked_value(&self) -> String {
        let len = self.value.len();
        if len <= 8 || !self.value.is_ascii() {
            "*".repeat(len.min(8))
        } else {
            format!("{}...{}", &self.value[..4], &self.value[len - 4..])
        }
    }
}

/// Netscape format: domain TAB flag TAB path TAB secure TAB expires TAB name TAB value
pub fn parse_netscape(content: &str) -> Vec<ParsedCookie> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches(['\r', '\n']);
            // curl and browser exporters mark HttpOnly cookies with a comment-like prefix
            let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }

            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 7 {
                return None;
            }
            Some(ParsedCookie {
                domain: parts[0].trim().to_string(),
                secure: parts[3].eq_ignore_ascii_case("TRUE"),
                expires: parts[4].trim().parse().ok(),
                name: parts[5].trim().to_string(),
                value: parts[6].trim().to_string(),
            })
        })
        .collect()
}

/// `name -> value` for unexpired cookies whose domain matches `domain` (subdomains included).
pub fn cookies_for_domain(content: &str, domain: &str) -> BTreeMap<String, String> {
    let mut jar = BTreeMap::new();
    let mut expired = 0usize;
    for cookie in parse_netscape(content) {
        if !cookie.domain.trim_start_matches('.').ends_with(domain) {
            continue;
        }
        if cookie.is_expired() {
            expired += 1;
            continue;
        }
        jar.insert(cookie.name, cookie.value);
    }
    if expired > 0 {
        log::warn!("⚠️ Skipped {} expired {} cookies", expired, domain);
    }
    jar
}

/// Builds a session from a Netscape file; `None` when it carries no platform cookies.
pub fn session_from_netscape(account: &str, content: &str) -> Option<SessionState> {
    let jar = cookies_for_domain(content, PLATFORM_DOMAIN);
    if jar.is_empty() {
        log::warn!("Cookie file has no {} cookies", PLATFORM_DOMAIN);
        return None;
    }
    Some(SessionState::new(account, jar))
}

/// `Cookie:` header value for the platform domain.
pub fn cookie_header(state: &SessionState) -> String {
    state.cookie_header()
}

/// Renders the session as a Netscape file for `yt-dlp --cookies`.
pub fn to_netscape(state: &SessionState) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    let expires = Utc::now().timestamp() + 365 * 24 * 3600;
    for (name, value) in &state.cookies {
        if value.is_empty() {
            continue;
        }
        out.push_str(&format!(
            ".{}\tTRUE\t/\tTRUE\t{}\t{}\t{}\n",
            PLATFORM_DOMAIN, expires, name, value
        ));
    }
    out
}

pub async fn write_netscape(state: &SessionState, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs_err::tokio::create_dir_all(parent).await?;
    }
    fs_err::tokio::write(path, to_netscape(state)).await?;
    Ok(())
}
