//! headless_chrome engine. Its API is blocking, so every call hops onto the blocking pool.

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::sync::Arc;

use super::driver::{BrowserDriver, BrowserEngine, BrowserLauncher, LaunchSettings, HEADLESS_ARG, STEALTH_SCRIPT};
use crate::core::config::instagram;
use crate::extract::StrategyError;

fn chrome_error(e: impl std::fmt::Display) -> StrategyError {
    StrategyError::TransientNetwork(format!("headless_chrome: {}", e))
}

/// Runs a blocking tab operation off the async runtime.
async fn on_tab<T, F>(tab: &Arc<Tab>, op: F) -> Result<T, StrategyError>
where
    T: Send + 'static,
    F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
{
    let tab = Arc::clone(tab);
    tokio::task::spawn_blocking(move || op(&tab))
        .await
        .map_err(chrome_error)?
        .map_err(chrome_error)
}

fn cookie_script(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .filter_map(|(name, value)| serde_json::to_string(&format!("{}={}; domain=.instagram.com; path=/", name, value)).ok())
        .map(|assignment| format!("document.cookie = {};", assignment))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct HeadlessLauncher;

#[async_trait]
impl BrowserLauncher for HeadlessLauncher {
    fn engine(&self) -> BrowserEngine {
        BrowserEngine::Headless
    }

    async fn launch(&self, settings: &LaunchSettings) -> Result<Box<dyn BrowserDriver>, StrategyError> {
        let mut args = settings.args();
        args.push(HEADLESS_ARG.to_string());
        let page_load = settings.page_load;

        let (browser, tab) = tokio::task::spawn_blocking(move || -> anyhow::Result<(Browser, Arc<Tab>)> {
            let args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();
            let browser = Browser::new(LaunchOptions {
                // headless mode comes from --headless=new
                headless: false,
                sandbox: false,
                args,
                ..Default::default()
            })?;
            let tab = browser.new_tab()?;
            tab.set_default_timeout(page_load);
            tab.call_method(AddScriptToEvaluateOnNewDocument {
                source: STEALTH_SCRIPT.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })?;
            Ok((browser, tab))
        })
        .await
        .map_err(chrome_error)?
        .map_err(|e| StrategyError::Unsupported(format!("headless_chrome launch failed: {}", e)))?;

        log::info!("BrowserAutomation: headless_chrome launched");
        Ok(Box::new(HeadlessDriver {
            browser: Some(browser),
            tab,
        }))
    }
}

pub struct HeadlessDriver {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

#[async_trait]
impl BrowserDriver for HeadlessDriver {
    fn engine(&self) -> BrowserEngine {
        BrowserEngine::Headless
    }

    async fn goto(&mut self, url: &str) -> Result<(), StrategyError> {
        let url = url.to_string();
        on_tab(&self.tab, move |tab| {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn current_url(&mut self) -> Result<String, StrategyError> {
        on_tab(&self.tab, |tab| Ok(tab.get_url())).await
    }

    async fn content(&mut self) -> Result<String, StrategyError> {
        on_tab(&self.tab, |tab| tab.get_content()).await
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, StrategyError> {
        let script = script.to_string();
        on_tab(&self.tab, move |tab| Ok(tab.evaluate(&script, false)?.value.unwrap_or(Value::Null))).await
    }

    async fn set_cookies(&mut self, cookies: &BTreeMap<String, String>) -> Result<(), StrategyError> {
        // document.cookie only applies on the platform's own origin
        let current = self.current_url().await.unwrap_or_default();
        if !current.contains("instagram.com") {
            self.goto(instagram::BASE_URL).await?;
        }
        let script = cookie_script(cookies);
        self.evaluate(&script).await.map(|_| ())
    }

    async fn cookies(&mut self) -> Result<BTreeMap<String, String>, StrategyError> {
        on_tab(&self.tab, |tab| {
            Ok(tab
                .get_cookies()?
                .into_iter()
                .filter(|c| c.domain.ends_with("instagram.com"))
                .map(|c| (c.name, c.value))
                .collect())
        })
        .await
    }

    async fn click(&mut self, selector: &str) -> Result<(), StrategyError> {
        let selector = selector.to_string();
        on_tab(&self.tab, move |tab| {
            tab.find_element(&selector)?.click()?;
            Ok(())
        })
        .await
    }

    async fn type_text(&mut self, text: &str) -> Result<(), StrategyError> {
        let text = text.to_string();
        on_tab(&self.tab, move |tab| {
            tab.type_str(&text)?;
            Ok(())
        })
        .await
    }

    async fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            // Browser::drop kills the process and waits for it
            let _ = tokio::task::spawn_blocking(move || drop(browser)).await;
        }
    }

    fn abort(&mut self) {
        self.browser.take();
    }
}
