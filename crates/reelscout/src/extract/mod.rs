//! Extraction strategies.
//!
//! Each strategy turns a [`SourceSpec`] into [`VideoDescriptor`]s with one
//! technology. The set is closed ([`StrategyKind`]) and the order in which they
//! are tried comes from [`strategy_plan`].

pub mod browser;
pub mod direct;
pub mod graph_api;
pub mod orchestrator;
pub mod parse;
pub mod ytdlp;
pub mod ytdlp_errors;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::retry::Retryable;
use crate::core::types::{SourceKind, SourceSpec, StrategyKind, VideoDescriptor};
use crate::session::SessionState;
use crate::stealth::{HumanDelay, ProxyRotator, RequestWindow};

pub use browser::BrowserAutomation;
pub use direct::DirectHttp;
pub use graph_api::OfficialGraphApi;
pub use ytdlp::BulkExtractorTool;

/// Why a strategy produced nothing. Recovered by the orchestrator, never surfaced.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    /// Login wall, missing token permission, checkpoint
    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    /// Strategy cannot handle this source (or is not configured)
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("timed out")]
    Timeout,

    #[error("network error: {0}")]
    TransientNetwork(String),
}

impl StrategyError {
    /// Reason category used in fallthrough logs.
    pub fn category(&self) -> &'static str {
        match self {
            StrategyError::AuthRequired(_) | StrategyError::RateLimited { .. } => "blocked",
            StrategyError::NotFound(_) => "not_found",
            StrategyError::Unsupported(_) => "unsupported",
            StrategyError::Timeout => "timeout",
            StrategyError::TransientNetwork(_) => "network",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, StrategyError::RateLimited { .. })
    }
}

impl Retryable for StrategyError {
    fn is_retryable(&self) -> bool {
        self.is_rate_limited()
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            StrategyError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StrategyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return StrategyError::Timeout;
        }
        match e.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => StrategyError::AuthRequired(e.to_string()),
            Some(404) => StrategyError::NotFound(e.to_string()),
            Some(429) => StrategyError::RateLimited { retry_after: None },
            _ => StrategyError::TransientNetwork(e.to_string()),
        }
    }
}

/// Common contract of every extraction technology.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn supports(&self, kind: SourceKind) -> bool;

    /// Upper bound for one `collect` call
    fn budget(&self) -> Duration;

    /// Whether the orchestrator should back off and call again after `RateLimited`
    fn retry_on_rate_limit(&self) -> bool {
        false
    }

    /// At most `cap` descriptors, in discovery order.
    async fn collect(&self, spec: &SourceSpec, cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError>;
}

/// Order in which strategies are tried for a source kind, least expensive first.
pub fn strategy_plan(kind: SourceKind) -> &'static [StrategyKind] {
    use StrategyKind::*;
    match kind {
        SourceKind::Profile | SourceKind::Reels => &[DirectHttp, BulkExtractorTool, OfficialGraphApi, BrowserAutomation],
        SourceKind::Hashtag | SourceKind::Keyword => &[OfficialGraphApi, DirectHttp, BulkExtractorTool, BrowserAutomation],
        SourceKind::UrlList => &[BulkExtractorTool, DirectHttp],
    }
}

/// Collaborators shared by the strategies of one run.
#[derive(Clone)]
pub struct StrategyContext {
    pub delay: Arc<HumanDelay>,
    pub proxies: Arc<ProxyRotator>,
    /// Live session resolved before the run; fixed for its duration
    pub session: Option<SessionState>,
    /// Guards the unofficial HTML/JSON endpoints
    pub window: Arc<RequestWindow>,
}
