//! chromiumoxide engine.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Handler, Page};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;

use super::driver::{BrowserDriver, BrowserEngine, BrowserLauncher, LaunchSettings, STEALTH_SCRIPT};
use crate::extract::StrategyError;

const COOKIE_DOMAIN: &str = ".instagram.com";

fn cdp_error(e: CdpError) -> StrategyError {
    match e {
        CdpError::Timeout => StrategyError::Timeout,
        other => StrategyError::TransientNetwork(format!("cdp: {}", other)),
    }
}

fn spawn_handler_task(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                log::debug!("chromiumoxide handler event error: {}", e);
            }
        }
    })
}

/// Blank page with the stealth script installed for every document.
async fn open_stealth_page(browser: &Browser) -> Result<Page, StrategyError> {
    let page = browser.new_page("about:blank").await.map_err(cdp_error)?;
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
        .map_err(cdp_error)?;
    Ok(page)
}

/// The handler task must not outlive a launch that failed half way.
fn stop_handler_on_error<T>(handler_task: &JoinHandle<()>, result: Result<T, StrategyError>) -> Result<T, StrategyError> {
    if result.is_err() {
        handler_task.abort();
    }
    result
}

pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    fn engine(&self) -> BrowserEngine {
        BrowserEngine::Chromium
    }

    async fn launch(&self, settings: &LaunchSettings) -> Result<Box<dyn BrowserDriver>, StrategyError> {
        let config = BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .request_timeout(settings.page_load)
            .args(settings.args())
            .build()
            .map_err(StrategyError::Unsupported)?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| StrategyError::Unsupported(format!("chromium launch failed: {}", e)))?;
        let handler_task = spawn_handler_task(handler);
        let page = stop_handler_on_error(&handler_task, open_stealth_page(&browser).await)?;

        log::info!("BrowserAutomation: chromium launched");
        Ok(Box::new(ChromiumDriver {
            browser,
            page,
            handler_task,
            focused: None,
        }))
    }
}

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    focused: Option<Element>,
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    fn engine(&self) -> BrowserEngine {
        BrowserEngine::Chromium
    }

    async fn goto(&mut self, url: &str) -> Result<(), StrategyError> {
        self.focused = None;
        self.page.goto(url).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, StrategyError> {
        Ok(self.page.url().await.map_err(cdp_error)?.unwrap_or_default())
    }

    async fn content(&mut self) -> Result<String, StrategyError> {
        self.page.content().await.map_err(cdp_error)
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, StrategyError> {
        let result = self.page.evaluate(script).await.map_err(cdp_error)?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn set_cookies(&mut self, cookies: &BTreeMap<String, String>) -> Result<(), StrategyError> {
        let params: Vec<CookieParam> = cookies
            .iter()
            .filter_map(|(name, value)| {
                CookieParam::builder()
                    .name(name.clone())
                    .value(value.clone())
                    .domain(COOKIE_DOMAIN)
                    .path("/")
                    .secure(true)
                    .build()
                    .ok()
            })
            .collect();
        self.page.set_cookies(params).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<BTreeMap<String, String>, StrategyError> {
        let cookies = self.page.get_cookies().await.map_err(cdp_error)?;
        Ok(cookies
            .into_iter()
            .filter(|c| c.domain.ends_with("instagram.com"))
            .map(|c| (c.name, c.value))
            .collect())
    }

    async fn click(&mut self, selector: &str) -> Result<(), StrategyError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| StrategyError::NotFound(format!("no element {}", selector)))?;
        element.click().await.map_err(cdp_error)?;
        self.focused = Some(element);
        Ok(())
    }

    async fn type_text(&mut self, text: &str) -> Result<(), StrategyError> {
        let element = self
            .focused
            .as_ref()
            .ok_or_else(|| StrategyError::NotFound("no focused element".to_string()))?;
        element.type_str(text).await.map_err(cdp_error)?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            log::debug!("BrowserAutomation: chromium close: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }

    fn abort(&mut self) {
        // dropping Browser kills the child process
        self.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_page_setup_stops_handler() {
        let handler_task = tokio::spawn(std::future::pending::<()>());
        let result: Result<(), StrategyError> =
            stop_handler_on_error(&handler_task, Err(StrategyError::TransientNetwork("cdp: closed".to_string())));

        assert!(result.is_err());
        assert!(handler_task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_successful_page_setup_keeps_handler() {
        let handler_task = tokio::spawn(std::future::pending::<()>());
        assert!(stop_handler_on_error(&handler_task, Ok(())).is_ok());

        tokio::task::yield_now().await;
        assert!(!handler_task.is_finished());
        handler_task.abort();
    }
}
