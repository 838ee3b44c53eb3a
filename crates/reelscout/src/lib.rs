//! reelscout - short-form video acquisition pipeline
//!
//! Discovers reels on a platform that actively blocks automated access, filters
//! them by engagement and downloads the confirmed ones.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, retry policy, shared data types, engagement filter
//! - `stealth`: user-agent pool, human-like delays, proxy rotation, request window
//! - `session`: persisted sessions, browser cookie import, liveness probe
//! - `extract`: extraction strategies and the orchestrator that cascades through them
//! - `download`: download cascade for confirmed videos
//! - `collector`: top-level collection entry point
//! - `cli`: operator command line

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cli;
pub mod collector;
pub mod core;
pub mod download;
pub mod extract;
pub mod session;
pub mod stealth;

// Re-export commonly used types for convenience
pub use collector::CollectionService;
pub use core::config::Settings;
pub use core::error::{AppError, AppResult};
pub use core::types::{EngagementMetrics, SourceKind, SourceSpec, StrategyKind, VideoDescriptor};
pub use download::{DownloadResult, Downloader};
pub use extract::orchestrator::{CollectError, CollectionReport, ExtractionOrchestrator, FallthroughPolicy};
pub use extract::{ExtractionStrategy, StrategyError};
pub use session::{SessionState, SessionStore};
pub use stealth::{HumanDelay, ProxyRotator, UserAgentPool};
