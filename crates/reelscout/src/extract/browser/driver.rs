//! Engine-neutral browser control.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use strum::Display;

use crate::extract::StrategyError;
use crate::stealth::proxy::Proxy;

/// Hides the usual automation fingerprints before any page script runs.
pub const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BrowserEngine {
    /// chromiumoxide over CDP
    Chromium,
    /// headless_chrome (blocking API)
    Headless,
}

/// Flag selecting Chrome's current headless mode, for engines that take it as an argument
pub const HEADLESS_ARG: &str = "--headless=new";

/// What every engine is launched with.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub user_agent: String,
    pub proxy: Option<Proxy>,
    pub page_load: Duration,
}

impl LaunchSettings {
    /// Chrome command-line flags. Headless mode is left to each engine.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
            "--disable-infobars".to_string(),
            "--window-size=1280,900".to_string(),
            format!("--user-agent={}", self.user_agent),
        ];
        match &self.proxy {
            Some(proxy) => args.push(format!("--proxy-server={}", proxy.to_url())),
            None => args.push("--no-proxy-server".to_string()),
        }
        args
    }
}

/// One browser page. Implementations own the browser process.
#[async_trait]
pub trait BrowserDriver: Send {
    fn engine(&self) -> BrowserEngine;

    async fn goto(&mut self, url: &str) -> Result<(), StrategyError>;

    async fn current_url(&mut self) -> Result<String, StrategyError>;

    /// Rendered document HTML
    async fn content(&mut self) -> Result<String, StrategyError>;

    /// Result of a script expression, `Null` when it has none.
    async fn evaluate(&mut self, script: &str) -> Result<Value, StrategyError>;

    /// Installs cookies for the platform domain.
    async fn set_cookies(&mut self, cookies: &BTreeMap<String, String>) -> Result<(), StrategyError>;

    async fn cookies(&mut self) -> Result<BTreeMap<String, String>, StrategyError>;

    /// Clicks (and focuses) the first element matching a CSS selector.
    async fn click(&mut self, selector: &str) -> Result<(), StrategyError>;

    /// Types into the focused element.
    async fn type_text(&mut self, text: &str) -> Result<(), StrategyError>;

    /// Graceful shutdown.
    async fn close(&mut self);

    /// Synchronous teardown for drop paths (cancellation, panics).
    fn abort(&mut self) {}
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    fn engine(&self) -> BrowserEngine;

    async fn launch(&self, settings: &LaunchSettings) -> Result<Box<dyn BrowserDriver>, StrategyError>;
}

/// Owns a driver; a guard dropped without [`DriverGuard::close`] aborts the browser.
pub struct DriverGuard {
    driver: Box<dyn BrowserDriver>,
    closed: bool,
}

impl DriverGuard {
    pub fn new(driver: Box<dyn BrowserDriver>) -> Self {
        Self { driver, closed: false }
    }

    pub fn page(&mut self) -> &mut dyn BrowserDriver {
        self.driver.as_mut()
    }

    pub async fn close(mut self) {
        self.driver.close().await;
        self.closed = true;
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("BrowserAutomation: {} browser dropped without close, aborting", self.driver.engine());
            self.driver.abort();
        }
    }
}

/// Engines compiled into this build, in the order they are tried.
pub fn available_launchers() -> Vec<Box<dyn BrowserLauncher>> {
    #[allow(unused_mut)]
    let mut launchers: Vec<Box<dyn BrowserLauncher>> = Vec::new();
    #[cfg(feature = "chromium")]
    launchers.push(Box::new(super::chromium::ChromiumLauncher));
    #[cfg(feature = "headless")]
    launchers.push(Box::new(super::headless::HeadlessLauncher));
    launchers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::proxy::ProxyProtocol;

    #[test]
    fn test_launch_args() {
        let mut settings = LaunchSettings {
            user_agent: "UA/1.0".to_string(),
            proxy: None,
            page_load: Duration::from_secs(30),
        };
        let args = settings.args();
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--user-agent=UA/1.0".to_string()));
        assert!(args.contains(&"--no-proxy-server".to_string()));

        settings.proxy = Some(Proxy::new(ProxyProtocol::Socks5, "127.0.0.1", 1080));
        let args = settings.args();
        assert!(args.contains(&"--proxy-server=socks5://127.0.0.1:1080".to_string()));
        assert!(!args.contains(&"--no-proxy-server".to_string()));
    }
}
