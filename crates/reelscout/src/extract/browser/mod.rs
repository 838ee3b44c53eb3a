//! Browser automation strategy: a real (headless) browser, logged in or reusing a session,
//! scrolled until the grid stops growing.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod driver;
#[cfg(feature = "headless")]
pub mod headless;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::parse::{extract_from_html, normalize_handle, normalize_tag, Discovered};
use super::{ExtractionStrategy, StrategyContext, StrategyError};
use crate::core::config::{collection, delay, instagram, timeouts, Credentials};
use crate::core::types::{SourceKind, SourceSpec, StrategyKind, VideoDescriptor};
use crate::session::{SessionState, SessionStore};

pub use driver::{available_launchers, BrowserDriver, BrowserEngine, BrowserLauncher, DriverGuard, LaunchSettings};

const USERNAME_FIELD: &str = r#"input[name="username"]"#;
const PASSWORD_FIELD: &str = r#"input[name="password"]"#;
const SUBMIT_BUTTON: &str = r#"button[type="submit"]"#;
const VERIFICATION_MARKERS: &[&str] = &["challenge", "checkpoint", "two_factor"];
const MAX_DIALOGS: usize = 2;

/// Clicks the first "not now"/"later" style button, returns whether one was found.
const DISMISS_DIALOG_SCRIPT: &str = r#"(() => {
  const words = ['not now', 'не сейчас', 'later', 'позже'];
  for (const el of document.querySelectorAll('button, div[role="button"]')) {
    const text = (el.innerText || '').trim().toLowerCase();
    if (words.some((w) => text.includes(w))) { el.click(); return true; }
  }
  return false;
})()"#;

const SCROLL_HEIGHT_SCRIPT: &str = "document.body.scrollHeight";
const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight)";

pub struct BrowserAutomation {
    ctx: StrategyContext,
    store: Arc<SessionStore>,
    accounts: Vec<Credentials>,
    next_account: AtomicUsize,
    launchers: Vec<Box<dyn BrowserLauncher>>,
}

impl BrowserAutomation {
    pub fn new(ctx: StrategyContext, store: Arc<SessionStore>, accounts: Vec<Credentials>) -> Self {
        Self::with_launchers(ctx, store, accounts, available_launchers())
    }

    pub fn with_launchers(
        ctx: StrategyContext,
        store: Arc<SessionStore>,
        accounts: Vec<Credentials>,
        launchers: Vec<Box<dyn BrowserLauncher>>,
    ) -> Self {
        Self {
            ctx,
            store,
            accounts,
            next_account: AtomicUsize::new(0),
            launchers,
        }
    }

    /// Round-robin over configured accounts, one per attempt.
    fn pick_account(&self) -> Option<&Credentials> {
        if self.accounts.is_empty() {
            return None;
        }
        let i = self.next_account.fetch_add(1, Ordering::Relaxed) % self.accounts.len();
        self.accounts.get(i)
    }

    fn target(spec: &SourceSpec) -> Result<(String, usize), StrategyError> {
        match spec.kind.platform_kind() {
            SourceKind::Profile => {
                let handle = normalize_handle(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad handle {:?}", spec.identifier)))?;
                Ok((format!("{}/{}/", instagram::BASE_URL, handle), collection::PROFILE_MAX_SCROLLS))
            }
            SourceKind::Hashtag => {
                let tag = normalize_tag(&spec.identifier)
                    .ok_or_else(|| StrategyError::NotFound(format!("bad hashtag {:?}", spec.identifier)))?;
                Ok((
                    format!("{}/explore/tags/{}/", instagram::BASE_URL, tag),
                    collection::HASHTAG_MAX_SCROLLS,
                ))
            }
            other => Err(StrategyError::Unsupported(format!("{} sources", other))),
        }
    }

    /// Paced navigation followed by a settle pause.
    async fn navigate(&self, page: &mut dyn BrowserDriver, url: &str) -> Result<(), StrategyError> {
        self.ctx.delay.between_requests().await;
        tokio::time::timeout(timeouts::page_load(), page.goto(url))
            .await
            .map_err(|_| StrategyError::Timeout)??;
        let settle = timeouts::PAGE_SETTLE_SECS as f64;
        self.ctx.delay.pause(settle, settle + 1.0).await;
        Ok(())
    }

    /// Session reuse, else login with the next account, else anonymous.
    async fn authenticate(&self, page: &mut dyn BrowserDriver) -> Result<(), StrategyError> {
        if let Some(session) = &self.ctx.session {
            log::info!("BrowserAutomation: reusing session of {}", session.account);
            page.set_cookies(&session.cookies).await?;
            return Ok(());
        }
        match self.pick_account() {
            Some(credentials) => self.login(page, credentials).await,
            None => {
                log::info!("BrowserAutomation: no session or account, browsing anonymously");
                Ok(())
            }
        }
    }

    async fn login(&self, page: &mut dyn BrowserDriver, credentials: &Credentials) -> Result<(), StrategyError> {
        log::info!("🔐 BrowserAutomation: logging in as {}", credentials.username);
        self.navigate(page, instagram::LOGIN_URL).await?;

        self.fill_field(page, USERNAME_FIELD, &credentials.username).await?;
        self.fill_field(page, PASSWORD_FIELD, credentials.password.expose_secret()).await?;
        page.click(SUBMIT_BUTTON).await?;
        self.ctx
            .delay
            .pause(delay::AFTER_SUBMIT_MIN_SECS, delay::AFTER_SUBMIT_MAX_SECS)
            .await;

        // the cookie jar decides, whatever the UI shows
        let state = SessionState::new(credentials.username.clone(), page.cookies().await?);
        if state.has_session_cookie() {
            log::info!("✅ BrowserAutomation: logged in as {}", credentials.username);
            if let Err(e) = self.store.save(&state).await {
                log::warn!("BrowserAutomation: session not persisted: {}", e);
            }
            return Ok(());
        }

        let url = page.current_url().await.unwrap_or_default();
        if VERIFICATION_MARKERS.iter().any(|m| url.contains(m)) {
            log::error!("❌ BrowserAutomation: {} needs verification ({})", credentials.username, url);
            return Err(StrategyError::AuthRequired(format!(
                "{} is held at a verification step",
                credentials.username
            )));
        }
        Err(StrategyError::AuthRequired(format!("login rejected for {}", credentials.username)))
    }

    /// Focus, type character by character, blur.
    async fn fill_field(&self, page: &mut dyn BrowserDriver, selector: &str, text: &str) -> Result<(), StrategyError> {
        let pace = &self.ctx.delay;
        page.click(selector).await?;
        pace.pause(delay::FIELD_FOCUS_MIN_SECS, delay::FIELD_FOCUS_MAX_SECS).await;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            page.type_text(ch.encode_utf8(&mut buf)).await?;
            pace.pause(delay::TYPING_MIN_SECS, delay::TYPING_MAX_SECS).await;
        }
        pace.pause(delay::FIELD_BLUR_MIN_SECS, delay::FIELD_BLUR_MAX_SECS).await;
        Ok(())
    }

    async fn dismiss_dialogs(&self, page: &mut dyn BrowserDriver) {
        for _ in 0..MAX_DIALOGS {
            match page.evaluate(DISMISS_DIALOG_SCRIPT).await {
                Ok(serde_json::Value::Bool(true)) => {
                    log::debug!("BrowserAutomation: dismissed a dialog");
                    self.ctx.delay.pause(1.0, 2.0).await;
                }
                _ => break,
            }
        }
    }

    async fn scroll_height(page: &mut dyn BrowserDriver) -> Result<f64, StrategyError> {
        Ok(page.evaluate(SCROLL_HEIGHT_SCRIPT).await?.as_f64().unwrap_or(0.0))
    }

    /// Parses after every scroll until enough links, no growth, or `max_scrolls`.
    async fn scroll_and_collect(
        &self,
        page: &mut dyn BrowserDriver,
        max_scrolls: usize,
        cap: usize,
    ) -> Result<Discovered, StrategyError> {
        let wanted = cap.saturating_mul(collection::LINK_OVERSAMPLE);
        let mut found = Discovered::new(StrategyKind::BrowserAutomation);
        let mut height = Self::scroll_height(page).await?;

        for scroll in 0..=max_scrolls {
            let html = page.content().await?;
            for descriptor in extract_from_html(&html, StrategyKind::BrowserAutomation) {
                found.push(descriptor);
            }
            if found.len() >= wanted || scroll == max_scrolls {
                break;
            }

            page.evaluate(SCROLL_SCRIPT).await?;
            self.ctx.delay.pause(1.0, 4.0).await;
            let new_height = Self::scroll_height(page).await?;
            if new_height <= height {
                log::debug!("BrowserAutomation: page stopped growing after {} scrolls", scroll + 1);
                break;
            }
            height = new_height;
        }
        Ok(found)
    }

    async fn drive(
        &self,
        page: &mut dyn BrowserDriver,
        target: &str,
        max_scrolls: usize,
        cap: usize,
    ) -> Result<Vec<VideoDescriptor>, StrategyError> {
        self.authenticate(page).await?;
        self.navigate(page, target).await?;

        let landed = page.current_url().await?;
        if landed.contains("/accounts/login") {
            log::warn!("BrowserAutomation: {} redirected to the login wall", target);
            return Err(StrategyError::AuthRequired(format!("login redirect for {}", target)));
        }

        self.dismiss_dialogs(page).await;
        let found = self.scroll_and_collect(page, max_scrolls, cap).await?;
        log::info!("BrowserAutomation: {} posts on {}", found.len(), target);

        let mut items = found.into_vec();
        items.truncate(cap);
        Ok(items)
    }
}

#[async_trait]
impl ExtractionStrategy for BrowserAutomation {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BrowserAutomation
    }

    fn supports(&self, kind: SourceKind) -> bool {
        kind != SourceKind::UrlList
    }

    fn budget(&self) -> Duration {
        // login page and target page are both paced
        timeouts::browser_operation() + self.ctx.delay.request_ceiling() * 2
    }

    async fn collect(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
        if self.launchers.is_empty() {
            return Err(StrategyError::Unsupported(
                "no browser engine compiled in (build with --features browser)".to_string(),
            ));
        }
        let (target, max_scrolls) = Self::target(spec)?;
        let settings = LaunchSettings {
            user_agent: self.ctx.delay.current_user_agent(),
            proxy: self.ctx.proxies.next(),
            page_load: timeouts::page_load(),
        };

        let mut last_error = StrategyError::Unsupported("no browser engine started".to_string());
        for launcher in &self.launchers {
            let driver = match launcher.launch(&settings).await {
                Ok(driver) => driver,
                Err(e) => {
                    log::warn!("BrowserAutomation: {} engine unavailable: {}", launcher.engine(), e);
                    last_error = e;
                    continue;
                }
            };

            let mut guard = DriverGuard::new(driver);
            let result = self.drive(guard.page(), &target, max_scrolls, cap).await;
            guard.close().await;

            match result {
                Ok(items) => return Ok(items),
                Err(e @ (StrategyError::TransientNetwork(_) | StrategyError::Timeout)) => {
                    log::warn!("BrowserAutomation: {} engine failed: {}", launcher.engine(), e);
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }
}
