use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use reelscout::cli::{Cli, CollectArgs, Commands};
use reelscout::collector::{CollectionService, RunContext};
use reelscout::core::config::{self, Settings};
use reelscout::core::logging::{init_logger, log_startup_configuration};
use reelscout::extract::orchestrator::AttemptOutcome;
use reelscout::session::{BrowserCookieImporter, SessionProbe, SessionStore};
use reelscout::stealth::UserAgentPool;
use reelscout::{CollectError, Downloader, SourceSpec};

/// Operator CLI for the acquisition pipeline
///
/// Descriptors and download results go to stdout as JSON, diagnostics to the log.
#[tokio::main]
async fn main() -> Result<()> {
    // .env first: the config statics read the environment once
    let _ = dotenv();

    let cli = Cli::parse_args();
    init_logger(&config::LOG_FILE_PATH, cli.verbose)?;

    let mut settings = Settings::from_env();
    log_startup_configuration(&settings);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                log::warn!("🛑 Ctrl-C received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Collect(args) => run_collect(&mut settings, args, cancel).await,
        Commands::Download { urls, dir, account } => {
            let dir = dir.unwrap_or_else(|| settings.download_dir.clone());
            run_download(&settings, urls, &dir, account.as_deref(), cancel).await
        }
        Commands::ProbeSession { account } => run_probe_session(&settings, &account).await,
        Commands::ImportCookies { account, from } => run_import_cookies(&settings, &account, from).await,
    }
}

async fn read_known_ids(path: Option<&Path>) -> Result<Vec<String>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = fs_err::tokio::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn run_collect(settings: &mut Settings, args: CollectArgs, cancel: CancellationToken) -> Result<()> {
    settings.accept_partial |= args.accept_partial;
    if let Some(secs) = args.budget {
        settings.collection_budget = Duration::from_secs(secs);
    }

    let spec = SourceSpec {
        kind: args.kind,
        identifier: args.identifier,
        cap: args.cap,
        min_views: args.min_views.or(settings.min_views),
        min_likes: args.min_likes.or(settings.min_likes),
        account: args.account,
    };
    log::info!(
        "Collecting {} '{}' (cap {}, min_views {:?}, min_likes {:?})",
        spec.kind,
        spec.identifier,
        spec.cap,
        spec.min_views,
        spec.min_likes
    );

    let run = RunContext::from_settings(settings, spec.account.as_deref()).await?;
    let known = read_known_ids(args.known_ids.as_deref())
        .await
        .context("reading known ids")?;
    let service = CollectionService::from_settings(settings, &run)?
        .with_known_ids(known)
        .with_cancellation(cancel.clone());

    let report = match service.collect(&spec).await {
        Ok(report) => report,
        Err(CollectError::Cancelled) => anyhow::bail!("collection cancelled"),
    };

    for attempt in &report.attempts {
        let outcome = match &attempt.outcome {
            AttemptOutcome::Success(n) => format!("{} new", n),
            AttemptOutcome::Empty => "empty".to_string(),
            AttemptOutcome::Timeout => "timeout".to_string(),
            AttemptOutcome::Error(e) => format!("{} ({})", e.category(), e),
        };
        log::info!(
            "  {} → {} in {:.1}s ({} retries)",
            attempt.strategy,
            outcome,
            attempt.elapsed.as_secs_f64(),
            attempt.retries
        );
    }
    if report.budget_exhausted {
        log::warn!("⏱️ Collection budget exhausted, results are partial");
    }

    println!("{}", serde_json::to_string_pretty(&report.descriptors)?);

    if let Some(dir) = args.download {
        let urls: Vec<String> = report.descriptors.iter().map(|d| d.source_url.clone()).collect();
        let downloader = Downloader::from_settings(settings, run.strategy.clone())?;
        let results = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("download cancelled"),
            results = downloader.download_many(&urls, &dir) => results,
        };
        println!("{}", serde_json::to_string_pretty(&results)?);
    }
    Ok(())
}

async fn run_download(
    settings: &Settings,
    urls: Vec<String>,
    dir: &Path,
    account: Option<&str>,
    cancel: CancellationToken,
) -> Result<()> {
    let run = RunContext::from_settings(settings, account).await?;
    let downloader = Downloader::from_settings(settings, run.strategy)?;

    let results = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("download cancelled"),
        results = downloader.download_many(&urls, dir) => results,
    };
    let failed = results.iter().filter(|r| !r.success).count();
    println!("{}", serde_json::to_string_pretty(&results)?);

    if failed > 0 {
        anyhow::bail!("{} of {} downloads failed", failed, results.len());
    }
    Ok(())
}

fn probe_for(settings: &Settings) -> Result<SessionProbe> {
    let pool = UserAgentPool::shared(&settings.user_agents_file);
    Ok(SessionProbe::new(pool.pick_random(), None)?)
}

async fn run_probe_session(settings: &Settings, account: &str) -> Result<()> {
    let store = SessionStore::new(&settings.sessions_dir);
    let state = store
        .load(account)
        .await
        .with_context(|| format!("no saved session for {} in {}", account, settings.sessions_dir.display()))?;

    let probe = probe_for(settings)?;
    let identity = store.probe_liveness(&probe, &state).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "account": account,
            "live": identity.is_some(),
            "identity": identity,
            "missing_cookies": state.missing_required(),
        }))?
    );
    if identity.is_none() {
        anyhow::bail!("session of {} is no longer logged in", account);
    }
    Ok(())
}

async fn run_import_cookies(settings: &Settings, account: &str, from: Option<PathBuf>) -> Result<()> {
    let store = SessionStore::new(&settings.sessions_dir);
    let probe = probe_for(settings)?;

    let state = match from {
        Some(path) => store.resolve(account, &probe, Some(path.as_path()), None).await,
        None => {
            let importer = BrowserCookieImporter::discover(settings.browser_cookie_key.as_ref());
            log::info!("Scanning {} browser cookie stores", importer.profiles().len());
            store
                .resolve(account, &probe, settings.cookies_file.as_deref(), Some(&importer))
                .await
        }
    };

    let state = state.with_context(|| format!("no logged-in session found for {}", account))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "account": state.account,
            "saved_to": store.path_for(account),
            "cookies": state.cookies.keys().collect::<Vec<_>>(),
        }))?
    );
    Ok(())
}
