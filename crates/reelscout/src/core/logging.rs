//! Logging initialization and configuration checking
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Startup diagnostics for sessions, proxies and extraction backends

use anyhow::Result;
use secrecy::ExposeSecret;
use simplelog::*;
use std::fs::File;

use crate::core::config::{self, Settings};

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `verbose` - Debug level instead of Info
pub fn init_logger(log_file_path: &str, verbose: bool) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the acquisition configuration at startup
///
/// Checks:
/// - Netscape cookie file existence
/// - saved sessions directory
/// - configured accounts and Graph API token shape
/// - proxy sources
/// - compiled-in browser engines
pub fn log_startup_configuration(settings: &Settings) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("🔎 Acquisition Configuration Check");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    match &settings.cookies_file {
        Some(path) if path.exists() => log::info!("✅ INSTAGRAM_COOKIES_FILE: {}", path.display()),
        Some(path) => log::error!("❌ INSTAGRAM_COOKIES_FILE: {} (FILE NOT FOUND!)", path.display()),
        None => log::warn!("⚠️  INSTAGRAM_COOKIES_FILE: not set"),
    }

    if settings.sessions_dir.is_dir() {
        log::info!("✅ SESSIONS_DIR: {}", settings.sessions_dir.display());
    } else {
        log::info!(
            "ℹ️  SESSIONS_DIR: {} (will be created on first verified login)",
            settings.sessions_dir.display()
        );
    }

    if settings.accounts.is_empty() {
        log::warn!("⚠️  No login accounts configured - browser automation can only reuse imported sessions");
    } else {
        log::info!("✅ {} login account(s) configured", settings.accounts.len());
    }

    match &settings.graph_api_token {
        Some(token) if token.expose_secret().starts_with("EAA") => {
            log::info!("✅ GRAPH_API_TOKEN: Facebook Graph token (hashtag search available)")
        }
        Some(token) if token.expose_secret().starts_with("IG") => {
            log::warn!("⚠️  GRAPH_API_TOKEN: Instagram token - hashtag search is NOT supported on graph.instagram.com")
        }
        Some(_) => log::warn!("⚠️  GRAPH_API_TOKEN: unrecognised token prefix"),
        None => log::info!("ℹ️  GRAPH_API_TOKEN: not set (official API strategy disabled)"),
    }

    let proxy = &settings.proxy;
    log::info!(
        "🌐 Proxies: {} explicit, system={}, local probe={}, selection={}",
        proxy.explicit.len(),
        proxy.system.as_deref().unwrap_or("none"),
        proxy
            .local_port
            .map(|p| format!("127.0.0.1:{}", p))
            .unwrap_or_else(|| "off".to_string()),
        if proxy.rotate_randomly { "random" } else { "round-robin" }
    );

    log::info!("🛠  yt-dlp binary: {}", config::YTDL_BIN.as_str());

    let engines: Vec<&str> = [
        cfg!(feature = "chromium").then_some("chromiumoxide"),
        cfg!(feature = "headless").then_some("headless_chrome"),
    ]
    .into_iter()
    .flatten()
    .collect();
    if engines.is_empty() {
        log::warn!("⚠️  No browser engines compiled in (build with --features browser)");
    } else {
        log::info!("✅ Browser engines: {}", engines.join(", "));
    }

    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
