//! Pool of desktop browser user agents.
//!
//! Loaded from a plain text file (one UA per line). Mobile agents are dropped
//! because the desktop web app serves the HTML shapes the parsers understand.

use once_cell::sync::OnceCell;
use rand::seq::IndexedRandom;
use std::path::Path;
use std::sync::Arc;

use crate::core::config::user_agents::{MAX_AGENTS, MAX_LINES, MIN_LENGTH};

/// Used when the file is missing or yields nothing usable.
const FALLBACK_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

const MOBILE_MARKERS: &[&str] = &["Mobile", "Android", "iPhone", "iPad"];
const DESKTOP_MARKERS: &[&str] = &["Windows", "Macintosh", "Linux", "X11"];

static SHARED: OnceCell<Arc<UserAgentPool>> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
    fallback: bool,
}

impl UserAgentPool {
    /// Reads and filters the file. Never fails: falls back to the built-in set.
    pub fn load(path: &Path) -> Self {
        match fs_err::read_to_string(path) {
            Ok(content) => {
                let pool = Self::from_lines(&content);
                if pool.fallback {
                    log::warn!(
                        "UserAgentPool: no desktop agents in {}, using {} built-in agents",
                        path.display(),
                        FALLBACK_AGENTS.len()
                    );
                } else {
                    log::info!("UserAgentPool: loaded {} agents from {}", pool.agents.len(), path.display());
                }
                pool
            }
            Err(e) => {
                log::warn!("UserAgentPool: {} - using built-in agents", e);
                Self::fallback()
            }
        }
    }

    /// Process-wide pool. The first successful load is kept for good; a
    /// fallback pool is handed out uncached so a later call can still read the file.
    pub fn shared(path: &Path) -> Arc<Self> {
        let loaded = SHARED.get_or_try_init(|| {
            let pool = Self::load(path);
            if pool.fallback {
                Err(pool)
            } else {
                Ok(Arc::new(pool))
            }
        });
        match loaded {
            Ok(pool) => Arc::clone(pool),
            Err(fallback) => Arc::new(fallback),
        }
    }

    pub fn from_lines(content: &str) -> Self {
        let agents: Vec<String> = content
            .lines()
            .take(MAX_LINES)
            .map(str::trim)
            .filter(|line| !line.starts_with('#') && line.len() >= MIN_LENGTH)
            .filter(|line| is_desktop_agent(line))
            .take(MAX_AGENTS)
            .map(str::to_string)
            .collect();

        if agents.is_empty() {
            return Self::fallback();
        }
        Self {
            agents,
            fallback: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            agents: FALLBACK_AGENTS.iter().map(|s| s.to_string()).collect(),
            fallback: true,
        }
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn pick_random(&self) -> &str {
        self.agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_AGENTS[0])
    }

    /// Random agent other than `current`; the only agent when the pool has one.
    pub fn pick_different_from(&self, current: &str) -> &str {
        let others: Vec<&String> = self.agents.iter().filter(|ua| ua.as_str() != current).collect();
        match others.choose(&mut rand::rng()).copied() {
            Some(ua) => ua.as_str(),
            None => self.pick_random(),
        }
    }
}

fn is_desktop_agent(line: &str) -> bool {
    (line.contains("Chrome/") || line.contains("Firefox/"))
        && !MOBILE_MARKERS.iter().any(|m| line.contains(m))
        && DESKTOP_MARKERS.iter().any(|m| line.contains(m))
}
