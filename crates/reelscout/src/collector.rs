//! Top-level collection entry point.
//!
//! Normalises a [`SourceSpec`] into concrete targets, runs the orchestrator on
//! each, then applies the engagement filter and the caller's known-id set.

use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::config::Settings;
use crate::core::error::AppResult;
use crate::core::types::{SourceKind, SourceSpec};
use crate::core::validation;
use crate::extract::orchestrator::{CollectError, CollectionReport, ExtractionOrchestrator, FallthroughPolicy};
use crate::extract::parse::{normalize_handle, normalize_tag};
use crate::extract::ytdlp::DurationBounds;
use crate::extract::{
    BrowserAutomation, BulkExtractorTool, DirectHttp, ExtractionStrategy, OfficialGraphApi, StrategyContext,
};
use crate::session::browser_cookies::BrowserCookieImporter;
use crate::session::probe::SessionProbe;
use crate::session::SessionStore;
use crate::stealth::{DelayPolicy, HumanDelay, ProxyRotator, RequestWindow, UserAgentPool};

/// Collaborators of one run: delays and UA, proxies, the resolved session and the session store.
pub struct RunContext {
    pub strategy: StrategyContext,
    pub store: Arc<SessionStore>,
}

impl RunContext {
    /// Loads the UA pool, probes proxies, and resolves a live session for `account`
    /// (saved file, cookie file, then browser profiles).
    pub async fn from_settings(settings: &Settings, account: Option<&str>) -> AppResult<Self> {
        let pool = UserAgentPool::shared(&settings.user_agents_file);
        let delay = Arc::new(HumanDelay::new(pool, DelayPolicy::default()));
        let proxies = Arc::new(ProxyRotator::from_settings(&settings.proxy).await);
        let store = Arc::new(SessionStore::new(&settings.sessions_dir));

        let account = account
            .map(str::to_string)
            .or_else(|| settings.accounts.first().map(|c| c.username.clone()))
            .unwrap_or_else(|| "default".to_string());
        let probe = SessionProbe::new(&delay.current_user_agent(), proxies.next().as_ref())?;
        let importer = BrowserCookieImporter::discover(settings.browser_cookie_key.as_ref());
        let session = store
            .resolve(&account, &probe, settings.cookies_file.as_deref(), Some(&importer))
            .await;

        Ok(Self {
            strategy: StrategyContext {
                delay,
                proxies,
                session,
                window: Arc::new(RequestWindow::default()),
            },
            store,
        })
    }
}

pub struct CollectionService {
    orchestrator: ExtractionOrchestrator,
    known_ids: HashSet<String>,
    cancel: CancellationToken,
    delay: Option<Arc<HumanDelay>>,
}

impl CollectionService {
    pub fn new(orchestrator: ExtractionOrchestrator) -> Self {
        Self {
            orchestrator,
            known_ids: HashSet::new(),
            cancel: CancellationToken::new(),
            delay: None,
        }
    }

    /// All four strategies wired from settings.
    pub fn from_settings(settings: &Settings, run: &RunContext) -> AppResult<Self> {
        let ctx = run.strategy.clone();
        let delay = Arc::clone(&ctx.delay);
        let proxy = ctx.proxies.next();
        let strategies: Vec<Arc<dyn ExtractionStrategy>> = vec![
            Arc::new(OfficialGraphApi::from_settings(settings, proxy.as_ref(), Arc::clone(&ctx.delay))?),
            Arc::new(DirectHttp::new(ctx.clone())),
            Arc::new(BulkExtractorTool::new(ctx.clone(), DurationBounds::from_settings(settings))),
            Arc::new(BrowserAutomation::new(ctx, Arc::clone(&run.store), settings.accounts.clone())),
        ];
        let policy = if settings.accept_partial {
            FallthroughPolicy::AcceptAnyNonEmpty
        } else {
            FallthroughPolicy::FillCap
        };
        let orchestrator = ExtractionOrchestrator::new(strategies)
            .with_budget(settings.collection_budget)
            .with_policy(policy);
        Ok(Self::new(orchestrator).with_delay(delay))
    }

    /// Post ids the caller already has; they never come back.
    pub fn with_known_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Paces consecutive targets of a multi-target spec.
    pub fn with_delay(mut self, delay: Arc<HumanDelay>) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Concrete targets of a spec: normalised handle or tag, one hashtag per keyword.
    pub fn targets(spec: &SourceSpec) -> Vec<SourceSpec> {
        match spec.kind {
            SourceKind::Profile | SourceKind::Reels => normalize_handle(&spec.identifier)
                .map(|handle| vec![spec.retarget(spec.kind, handle, spec.cap)])
                .unwrap_or_default(),
            SourceKind::Hashtag => normalize_tag(&spec.identifier)
                .map(|tag| vec![spec.retarget(SourceKind::Hashtag, tag, spec.cap)])
                .unwrap_or_default(),
            SourceKind::Keyword => spec
                .identifier
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter_map(normalize_tag)
                .unique()
                .map(|tag| spec.retarget(SourceKind::Hashtag, tag, spec.cap))
                .collect(),
            SourceKind::UrlList => vec![spec.clone()],
        }
    }

    pub async fn collect(&self, spec: &SourceSpec) -> Result<CollectionReport, CollectError> {
        let mut report = CollectionReport::default();
        if spec.cap == 0 {
            return Ok(report);
        }
        let targets = Self::targets(spec);
        if targets.is_empty() {
            log::warn!("CollectionService: nothing to collect from {} {:?}", spec.kind, spec.identifier);
            return Ok(report);
        }

        let deadline = Instant::now() + self.orchestrator.budget();
        let mut seen: HashSet<String> = HashSet::new();

        for (i, target) in targets.iter().enumerate() {
            if report.descriptors.len() >= spec.cap {
                break;
            }
            if let (Some(delay), true) = (&self.delay, i > 0) {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(CollectError::Cancelled),
                    _ = delay.between_requests() => {}
                }
            }
            let run = self.orchestrator.run_until(target, &self.cancel, deadline).await?;
            report.attempts.extend(run.attempts);
            report.budget_exhausted |= run.budget_exhausted;

            let raw = run.descriptors.len();
            let kept = validation::filter(run.descriptors, spec);
            let filtered_out = raw - kept.len();
            for descriptor in kept {
                if report.descriptors.len() >= spec.cap {
                    break;
                }
                if self.known_ids.contains(&descriptor.post_id) {
                    log::debug!("CollectionService: {} already known, skipping", descriptor.post_id);
                    continue;
                }
                if seen.insert(descriptor.post_id.clone()) {
                    report.descriptors.push(descriptor);
                }
            }
            if filtered_out > 0 {
                log::info!(
                    "CollectionService: {} of {} from {} below engagement thresholds",
                    filtered_out,
                    raw,
                    target.identifier
                );
            }
            if report.budget_exhausted {
                break;
            }
        }

        log::info!(
            "📦 CollectionService: {} '{}' → {} videos",
            spec.kind,
            spec.identifier,
            report.descriptors.len()
        );
        Ok(report)
    }
}
