//! Cascades through extraction strategies until the cap is filled, the plan is
//! exhausted, or the run budget is spent.

use itertools::Itertools;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{strategy_plan, ExtractionStrategy, StrategyError};
use crate::core::config::{collection, timeouts};
use crate::core::retry::{RetryConfig, Retryable};
use crate::core::types::{SourceSpec, StrategyKind, VideoDescriptor};

/// When to stop trying further strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallthroughPolicy {
    /// Keep going until the cap is filled or the plan runs out
    #[default]
    FillCap,
    /// Stop at the first strategy that yields anything
    AcceptAnyNonEmpty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// New, previously unseen descriptors added
    Success(usize),
    Empty,
    Error(StrategyError),
    /// Per-strategy or run budget ran out
    Timeout,
}

/// One strategy invocation (including its rate-limit retries)
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub strategy: StrategyKind,
    pub outcome: AttemptOutcome,
    pub retries: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    /// Unique by post id, in discovery order
    pub descriptors: Vec<VideoDescriptor>,
    pub attempts: Vec<ExtractionAttempt>,
    /// The run stopped because its wall-clock budget was spent
    pub budget_exhausted: bool,
}

impl CollectionReport {
    pub fn strategies_tried(&self) -> Vec<StrategyKind> {
        self.attempts.iter().map(|a| a.strategy).collect()
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectError {
    #[error("collection cancelled")]
    Cancelled,
}

pub struct ExtractionOrchestrator {
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
    budget: Duration,
    policy: FallthroughPolicy,
    backoff: RetryConfig,
}

impl ExtractionOrchestrator {
    /// Strategies may be registered in any order; the plan for each source kind decides.
    pub fn new(strategies: Vec<Arc<dyn ExtractionStrategy>>) -> Self {
        Self {
            strategies,
            budget: timeouts::collection_budget(),
            policy: FallthroughPolicy::default(),
            backoff: RetryConfig::rate_limit().max_retries(collection::RATE_LIMIT_RETRIES),
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_policy(mut self, policy: FallthroughPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Registered strategies able to serve `spec`, in plan order.
    pub fn plan_for(&self, spec: &SourceSpec) -> Vec<Arc<dyn ExtractionStrategy>> {
        strategy_plan(spec.kind)
            .iter()
            .filter_map(|kind| self.strategies.iter().find(|s| s.kind() == *kind))
            .filter(|s| s.supports(spec.kind))
            .cloned()
            .collect()
    }

    pub async fn run(&self, spec: &SourceSpec, cancel: &CancellationToken) -> Result<CollectionReport, CollectError> {
        self.run_until(spec, cancel, Instant::now() + self.budget).await
    }

    /// Like [`run`](Self::run) but against a deadline shared with other runs.
    pub async fn run_until(
        &self,
        spec: &SourceSpec,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<CollectionReport, CollectError> {
        let plan = self.plan_for(spec);
        let mut report = CollectionReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        if plan.is_empty() {
            log::warn!("Orchestrator: no strategy available for {} '{}'", spec.kind, spec.identifier);
            return Ok(report);
        }
        log::info!(
            "🔎 Orchestrator: {} '{}' (cap {}), plan: {}",
            spec.kind,
            spec.identifier,
            spec.cap,
            plan.iter().map(|s| s.kind()).join(" → ")
        );

        for (index, strategy) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(CollectError::Cancelled);
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "⏱️ Orchestrator: budget spent, skipping {} remaining strategies",
                    plan.len() - index
                );
                report.budget_exhausted = true;
                break;
            }

            let attempt = self.attempt(strategy.as_ref(), spec, cancel, deadline).await?;
            let kind = attempt.strategy;
            let outcome = match attempt.outcome {
                Ok(found) => {
                    let before = report.descriptors.len();
                    for descriptor in found {
                        if report.descriptors.len() >= spec.cap {
                            break;
                        }
                        if seen.insert(descriptor.post_id.clone()) {
                            report.descriptors.push(descriptor);
                        }
                    }
                    let added = report.descriptors.len() - before;
                    if added == 0 {
                        log::info!("⏭️ Orchestrator: {} → fallthrough (empty)", kind);
                        AttemptOutcome::Empty
                    } else {
                        log::info!(
                            "✅ Orchestrator: {} added {} ({}/{})",
                            kind,
                            added,
                            report.descriptors.len(),
                            spec.cap
                        );
                        AttemptOutcome::Success(added)
                    }
                }
                Err(StrategyError::Timeout) => {
                    log::warn!("⏭️ Orchestrator: {} → fallthrough (timeout)", kind);
                    AttemptOutcome::Timeout
                }
                Err(e) => {
                    log::warn!("⏭️ Orchestrator: {} → fallthrough ({}): {}", kind, e.category(), e);
                    AttemptOutcome::Error(e)
                }
            };
            let timed_out = outcome == AttemptOutcome::Timeout;
            report.attempts.push(ExtractionAttempt {
                strategy: kind,
                outcome,
                retries: attempt.retries,
                elapsed: attempt.elapsed,
            });

            if report.descriptors.len() >= spec.cap {
                break;
            }
            if self.policy == FallthroughPolicy::AcceptAnyNonEmpty && !report.descriptors.is_empty() {
                log::info!("Orchestrator: accepting partial result of {}", report.descriptors.len());
                break;
            }
            if timed_out && Instant::now() >= deadline {
                let skipped = plan.len() - index - 1;
                if skipped > 0 {
                    log::warn!("⏱️ Orchestrator: budget spent, skipping {} remaining strategies", skipped);
                }
                report.budget_exhausted = true;
                break;
            }
        }

        log::info!(
            "Orchestrator: {} '{}' done with {} descriptors after {} attempts{}",
            spec.kind,
            spec.identifier,
            report.descriptors.len(),
            report.attempts.len(),
            if report.budget_exhausted { " (budget exhausted)" } else { "" }
        );
        Ok(report)
    }

    /// Calls one strategy, backing off and retrying on rate limits when it allows that.
    async fn attempt(
        &self,
        strategy: &dyn ExtractionStrategy,
        spec: &SourceSpec,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<RawAttempt, CollectError> {
        let started = Instant::now();
        let mut retries = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(RawAttempt::finish(strategy.kind(), Err(StrategyError::Timeout), retries, started));
            }
            let limit = strategy.budget().min(remaining);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CollectError::Cancelled),
                r = tokio::time::timeout(limit, strategy.collect(spec, spec.cap)) => r,
            };

            let error = match result {
                Ok(Ok(found)) => return Ok(RawAttempt::finish(strategy.kind(), Ok(found), retries, started)),
                Err(_) => StrategyError::Timeout,
                Ok(Err(e)) => e,
            };

            if !(error.is_rate_limited() && strategy.retry_on_rate_limit() && retries < self.backoff.max_retries) {
                return Ok(RawAttempt::finish(strategy.kind(), Err(error), retries, started));
            }

            let wait = error
                .retry_after()
                .unwrap_or_else(|| self.backoff.delay_for_attempt(retries));
            let remaining = deadline.saturating_duration_since(Instant::now());
            if wait >= remaining {
                log::warn!(
                    "Orchestrator: {} rate limited, backoff {:?} exceeds remaining budget",
                    strategy.kind(),
                    wait
                );
                return Ok(RawAttempt::finish(strategy.kind(), Err(error), retries, started));
            }

            retries += 1;
            log::warn!(
                "🐌 Orchestrator: {} rate limited (blocked), retry {}/{} in {:?}",
                strategy.kind(),
                retries,
                self.backoff.max_retries,
                wait
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CollectError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

struct RawAttempt {
    strategy: StrategyKind,
    outcome: Result<Vec<VideoDescriptor>, StrategyError>,
    retries: u32,
    elapsed: Duration,
}

impl RawAttempt {
    fn finish(
        strategy: StrategyKind,
        outcome: Result<Vec<VideoDescriptor>, StrategyError>,
        retries: u32,
        started: Instant,
    ) -> Self {
        Self {
            strategy,
            outcome,
            retries,
            elapsed: started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SourceKind;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Scripted = Result<Vec<VideoDescriptor>, StrategyError>;

    struct Stub {
        kind: StrategyKind,
        script: Mutex<VecDeque<Scripted>>,
        calls: AtomicUsize,
        hang: bool,
        retry: bool,
    }

    impl Stub {
        fn new(kind: StrategyKind, script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                hang: false,
                retry: false,
            })
        }

        fn hanging(kind: StrategyKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                hang: true,
                retry: false,
            })
        }

        fn retrying(kind: StrategyKind, script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                hang: false,
                retry: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExtractionStrategy for Stub {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        fn supports(&self, _kind: SourceKind) -> bool {
            true
        }

        fn budget(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn retry_on_rate_limit(&self) -> bool {
            self.retry
        }

        async fn collect(&self, _spec: &SourceSpec, _cap: usize) -> Result<Vec<VideoDescriptor>, StrategyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Ok(Vec::new()))
        }
    }

    fn reels(kind: StrategyKind, ids: &[&str]) -> Vec<VideoDescriptor> {
        ids.iter()
            .map(|id| VideoDescriptor::from_link(format!("https://www.instagram.com/reel/{}/", id), *id, kind))
            .collect()
    }

    fn ids(report: &CollectionReport) -> Vec<&str> {
        report.descriptors.iter().map(|d| d.post_id.as_str()).collect()
    }

    fn profile(cap: usize) -> SourceSpec {
        SourceSpec::builder()
            .kind(SourceKind::Profile)
            .identifier("examplepage")
            .cap(cap)
            .build()
    }

    fn as_dyn(stubs: &[&Arc<Stub>]) -> Vec<Arc<dyn ExtractionStrategy>> {
        stubs.iter().map(|s| Arc::clone(*s) as Arc<dyn ExtractionStrategy>).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_empty_and_auth_required() {
        use StrategyKind::*;
        let direct = Stub::new(DirectHttp, vec![Ok(Vec::new())]);
        let bulk = Stub::new(BulkExtractorTool, vec![Err(StrategyError::AuthRequired("login wall".into()))]);
        let graph = Stub::new(
            OfficialGraphApi,
            vec![Ok(reels(OfficialGraphApi, &["r1", "r2", "r3", "r4", "r5"]))],
        );

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&graph, &bulk, &direct]));
        let report = orchestrator.run(&profile(20), &CancellationToken::new()).await.unwrap();

        assert_eq!(ids(&report), vec!["r1", "r2", "r3", "r4", "r5"]);
        assert_eq!(report.strategies_tried(), vec![DirectHttp, BulkExtractorTool, OfficialGraphApi]);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Empty);
        assert!(matches!(
            report.attempts[1].outcome,
            AttemptOutcome::Error(StrategyError::AuthRequired(_))
        ));
        assert_eq!(report.attempts[2].outcome, AttemptOutcome::Success(5));
        assert!(!report.budget_exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_once_cap_filled() {
        use StrategyKind::*;
        let direct = Stub::new(DirectHttp, vec![Ok(reels(DirectHttp, &["a", "b", "c", "d", "e"]))]);
        let bulk = Stub::new(BulkExtractorTool, vec![Ok(reels(BulkExtractorTool, &["x"]))]);

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&direct, &bulk]));
        let report = orchestrator.run(&profile(3), &CancellationToken::new()).await.unwrap();

        assert_eq!(ids(&report), vec!["a", "b", "c"]);
        assert_eq!(bulk.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_occurrence_wins_across_strategies() {
        use StrategyKind::*;
        let direct = Stub::new(DirectHttp, vec![Ok(reels(DirectHttp, &["abc123", "def456"]))]);
        let bulk = Stub::new(BulkExtractorTool, vec![Ok(reels(BulkExtractorTool, &["abc123", "ghi789"]))]);

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&direct, &bulk]));
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert_eq!(ids(&report), vec!["abc123", "def456", "ghi789"]);
        assert_eq!(report.descriptors[0].strategy, DirectHttp);
        assert_eq!(report.attempts[1].outcome, AttemptOutcome::Success(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_any_non_empty_stops_early() {
        use StrategyKind::*;
        let direct = Stub::new(DirectHttp, vec![Ok(reels(DirectHttp, &["a"]))]);
        let bulk = Stub::new(BulkExtractorTool, vec![Ok(reels(BulkExtractorTool, &["b"]))]);

        let orchestrator =
            ExtractionOrchestrator::new(as_dyn(&[&direct, &bulk])).with_policy(FallthroughPolicy::AcceptAnyNonEmpty);
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert_eq!(ids(&report), vec!["a"]);
        assert_eq!(bulk.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_hanging_strategy() {
        use StrategyKind::*;
        let direct = Stub::new(DirectHttp, vec![Ok(reels(DirectHttp, &["a", "b"]))]);
        let bulk = Stub::hanging(BulkExtractorTool);
        let graph = Stub::new(OfficialGraphApi, vec![Ok(reels(OfficialGraphApi, &["c"]))]);

        let orchestrator =
            ExtractionOrchestrator::new(as_dyn(&[&direct, &bulk, &graph])).with_budget(Duration::from_secs(10));
        let started = Instant::now();
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert!(started.elapsed() <= Duration::from_secs(11));
        assert_eq!(ids(&report), vec!["a", "b"]);
        assert!(report.budget_exhausted);
        assert_eq!(report.attempts[1].outcome, AttemptOutcome::Timeout);
        assert_eq!(graph.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_budget_times_out_and_falls_through() {
        use StrategyKind::*;
        let direct = Stub::hanging(DirectHttp);
        let bulk = Stub::new(BulkExtractorTool, vec![Ok(reels(BulkExtractorTool, &["a"]))]);

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&direct, &bulk]));
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert_eq!(ids(&report), vec!["a"]);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::Timeout);
        assert!(!report.budget_exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_backoff_then_retry() {
        use StrategyKind::*;
        let bulk = Stub::retrying(
            BulkExtractorTool,
            vec![
                Err(StrategyError::RateLimited {
                    retry_after: Some(Duration::from_secs(7)),
                }),
                Ok(reels(BulkExtractorTool, &["a"])),
            ],
        );

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&bulk]));
        let started = Instant::now();
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert_eq!(ids(&report), vec!["a"]);
        assert_eq!(bulk.calls(), 2);
        assert_eq!(report.attempts[0].retries, 1);
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_without_retry_falls_through() {
        use StrategyKind::*;
        let direct = Stub::new(DirectHttp, vec![Err(StrategyError::RateLimited { retry_after: None })]);
        let bulk = Stub::new(BulkExtractorTool, vec![Ok(reels(BulkExtractorTool, &["a"]))]);

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&direct, &bulk]));
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert_eq!(direct.calls(), 1);
        assert_eq!(ids(&report), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_are_bounded() {
        use StrategyKind::*;
        let limited = || Err(StrategyError::RateLimited { retry_after: None });
        let bulk = Stub::retrying(BulkExtractorTool, vec![limited(), limited(), limited(), limited()]);

        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&bulk]))
            .with_backoff(RetryConfig::new().max_retries(2).initial_delay(Duration::from_secs(1)).no_jitter());
        let report = orchestrator.run(&profile(10), &CancellationToken::new()).await.unwrap();

        assert_eq!(bulk.calls(), 3);
        assert!(report.descriptors.is_empty());
        assert!(matches!(
            report.attempts[0].outcome,
            AttemptOutcome::Error(StrategyError::RateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_run() {
        use StrategyKind::*;
        let direct = Stub::hanging(DirectHttp);
        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&direct]));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let result = orchestrator.run(&profile(10), &cancel).await;
        assert_eq!(result.unwrap_err(), CollectError::Cancelled);
    }

    #[tokio::test]
    async fn test_url_list_plan_skips_unregistered() {
        use StrategyKind::*;
        let graph = Stub::new(OfficialGraphApi, Vec::new());
        let direct = Stub::new(DirectHttp, Vec::new());
        let orchestrator = ExtractionOrchestrator::new(as_dyn(&[&graph, &direct]));

        let spec = SourceSpec::builder()
            .kind(SourceKind::UrlList)
            .identifier("https://www.instagram.com/reel/abc123/")
            .build();
        let plan: Vec<StrategyKind> = orchestrator.plan_for(&spec).iter().map(|s| s.kind()).collect();
        assert_eq!(plan, vec![DirectHttp]);
    }
}
