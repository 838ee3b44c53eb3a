//! Authenticated session persistence.
//!
//! A session is the platform cookie jar of one account. It is written to
//! `<sessions_dir>/<account>_cookies.json` only after it has been verified
//! (successful login or a live probe) and reloaded by every authenticated strategy.

pub mod browser_cookies;
pub mod decrypt;
pub mod netscape;
pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::core::config::instagram::REQUIRED_COOKIES;
use crate::core::error::{AppError, AppResult};

pub use browser_cookies::{BrowserCookieImporter, BrowserFamily};
pub use probe::SessionProbe;

/// Cookie jar of one account. Fixed once handed to a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub account: String,
    pub cookies: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(account: impl Into<String>, cookies: BTreeMap<String, String>) -> Self {
        Self {
            account: account.into(),
            cookies,
            created_at: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// `sessionid` is what makes the jar authenticated.
    pub fn has_session_cookie(&self) -> bool {
        self.get("sessionid").is_some()
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.get("csrftoken")
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        REQUIRED_COOKIES
            .iter()
            .copied()
            .filter(|name| self.get(name).is_none())
            .collect()
    }

    /// `Cookie:` header value, `name=value; name2=value2`.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// On-disk shapes: the current document, or the flat `{name: value}` map
/// written by older tooling.
#[derive(Deserialize)]
#[serde(untagged)]
enum SessionFile {
    Full(SessionState),
    Legacy(BTreeMap<String, String>),
}

pub struct SessionStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, account: &str) -> PathBuf {
        let safe: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .collect();
        self.dir.join(format!("{}_cookies.json", safe))
    }

    /// Reads the saved session. Missing, unreadable or empty files yield `None`.
    pub async fn load(&self, account: &str) -> Option<SessionState> {
        let path = self.path_for(account);
        let content = match fs_err::tokio::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("SessionStore: {}", e);
                return None;
            }
        };

        let state = match serde_json::from_str::<SessionFile>(&content) {
            Ok(SessionFile::Full(state)) => state,
            Ok(SessionFile::Legacy(cookies)) => {
                let created_at = fs_err::tokio::metadata(&path)
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(Utc::now);
                SessionState {
                    account: account.to_string(),
                    cookies,
                    created_at,
                }
            }
            Err(e) => {
                log::warn!("SessionStore: corrupted session file {}: {}", path.display(), e);
                return None;
            }
        };

        if state.cookies.is_empty() {
            return None;
        }
        log::info!(
            "SessionStore: loaded session for {} ({} cookies, created {})",
            account,
            state.cookies.len(),
            state.created_at.format("%Y-%m-%d %H:%M")
        );
        Some(state)
    }

    /// Persists a verified session atomically (temp file + rename).
    pub async fn save(&self, state: &SessionState) -> AppResult<()> {
        if state.cookies.is_empty() {
            return Err(AppError::Session(format!("refusing to save empty jar for {}", state.account)));
        }

        let _lock = self.write_lock.lock().await;

        fs_err::tokio::create_dir_all(&self.dir).await?;
        let path = self.path_for(&state.account);
        let temp_path = PathBuf::from(format!("{}.tmp.{}", path.display(), std::process::id()));
        let content = serde_json::to_string_pretty(state)?;

        fs_err::tokio::write(&temp_path, content).await?;
        if let Err(e) = fs_err::tokio::rename(&temp_path, &path).await {
            let _ = fs_err::tokio::remove_file(&temp_path).await;
            return Err(e.into());
        }

        log::info!("✅ Session for {} saved atomically: {}", state.account, path.display());
        Ok(())
    }

    pub async fn remove(&self, account: &str) -> AppResult<()> {
        let _lock = self.write_lock.lock().await;
        match fs_err::tokio::remove_file(self.path_for(account)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Liveness check; resolves the logged-in username. Never errors.
    pub async fn probe_liveness(&self, probe: &SessionProbe, state: &SessionState) -> Option<String> {
        probe.probe_liveness(state).await
    }

    /// Finds a live session for `account`, trying in order:
    /// 1. the saved session file,
    /// 2. the configured Netscape cookie file,
    /// 3. cookies of a logged-in browser on this host.
    ///
    /// The first origin that passes the probe is saved (when it did not come from the store) and returned.
    pub async fn resolve(
        &self,
        account: &str,
        probe: &SessionProbe,
        cookies_file: Option<&Path>,
        importer: Option<&BrowserCookieImporter>,
    ) -> Option<SessionState> {
        if let Some(state) = self.load(account).await {
            match probe.probe_liveness(&state).await {
                Some(identity) => {
                    log::info!("SessionStore: saved session for {} is live (@{})", account, identity);
                    return Some(state);
                }
                None => log::warn!("SessionStore: saved session for {} is dead, looking for a fresh one", account),
            }
        }

        if let Some(path) = cookies_file {
            match fs_err::tokio::read_to_string(path).await {
                Ok(content) => {
                    if let Some(state) = netscape::session_from_netscape(account, &content) {
                        if let Some(state) = self.verify_and_save(probe, state, "cookie file").await {
                            return Some(state);
                        }
                    }
                }
                Err(e) => log::warn!("SessionStore: {}", e),
            }
        }

        if let Some(importer) = importer {
            let importer = importer.clone();
            let jars = tokio::task::spawn_blocking(move || importer.import_all())
                .await
                .unwrap_or_default();
            for (family, cookies) in jars {
                let state = SessionState::new(account, cookies);
                let origin = format!("{} profile", family);
                if let Some(state) = self.verify_and_save(probe, state, &origin).await {
                    return Some(state);
                }
            }
        }

        log::warn!("SessionStore: no live session found for {}", account);
        None
    }

    async fn verify_and_save(&self, probe: &SessionProbe, state: SessionState, origin: &str) -> Option<SessionState> {
        if !state.has_session_cookie() {
            log::info!("SessionStore: {} has no sessionid, skipping", origin);
            return None;
        }
        let identity = probe.probe_liveness(&state).await?;
        log::info!("SessionStore: {} session is live (@{})", origin, identity);
        if let Err(e) = self.save(&state).await {
            log::warn!("SessionStore: failed to persist {} session: {}", origin, e);
        }
        Some(state)
    }
}
