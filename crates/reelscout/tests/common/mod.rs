//! Common test utilities
//!
//! Shared across the integration tests

#![allow(dead_code)]

use reelscout::extract::StrategyContext;
use reelscout::stealth::{DelayPolicy, RequestWindow};
use reelscout::{HumanDelay, ProxyRotator, SessionState, UserAgentPool};
use std::collections::BTreeMap;
use std::sync::Arc;

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Direct connection, fallback UA, no pauses.
pub fn context(session: Option<SessionState>) -> StrategyContext {
    StrategyContext {
        delay: Arc::new(HumanDelay::new(Arc::new(UserAgentPool::fallback()), DelayPolicy::instant())),
        proxies: Arc::new(ProxyRotator::direct()),
        session,
        window: Arc::new(RequestWindow::default()),
    }
}

pub fn jar(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}
