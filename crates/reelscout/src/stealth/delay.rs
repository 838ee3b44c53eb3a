//! Human-like pacing coupled with user-agent rotation.
//!
//! Every wait sleeps a uniform random time, sometimes adds a longer
//! "distraction" pause, and usually swaps the user agent afterwards.

use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::config::delay as cfg;
use crate::stealth::user_agents::UserAgentPool;

/// Probabilities and ranges that drive [`HumanDelay`]
#[derive(Debug, Clone)]
pub struct DelayPolicy {
    pub request: (f64, f64),
    pub post: (f64, f64),
    pub extra_pause_probability: f64,
    pub extra_pause: (f64, f64),
    pub ua_rotation_probability: f64,
    /// Multiplies every computed sleep; 0 turns waits into no-ops
    pub time_scale: f64,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            request: (cfg::REQUEST_MIN_SECS, cfg::REQUEST_MAX_SECS),
            post: (cfg::POST_MIN_SECS, cfg::POST_MAX_SECS),
            extra_pause_probability: cfg::EXTRA_PAUSE_PROBABILITY,
            extra_pause: (cfg::EXTRA_PAUSE_MIN_SECS, cfg::EXTRA_PAUSE_MAX_SECS),
            ua_rotation_probability: cfg::UA_ROTATION_PROBABILITY,
            time_scale: 1.0,
        }
    }
}

impl DelayPolicy {
    /// Same decisions, zero sleeping.
    pub fn instant() -> Self {
        Self {
            time_scale: 0.0,
            ..Self::default()
        }
    }
}

/// Decisions for one wait, drawn up front so no RNG is held across an await.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPlan {
    pub base: Duration,
    pub extra: Option<Duration>,
    pub rotate_user_agent: bool,
}

impl WaitPlan {
    pub fn total(&self) -> Duration {
        self.base + self.extra.unwrap_or_default()
    }
}

pub struct HumanDelay {
    pool: Arc<UserAgentPool>,
    policy: DelayPolicy,
    current_ua: Mutex<String>,
}

impl HumanDelay {
    pub fn new(pool: Arc<UserAgentPool>, policy: DelayPolicy) -> Self {
        let current_ua = pool.pick_random().to_string();
        Self {
            pool,
            policy,
            current_ua: Mutex::new(current_ua),
        }
    }

    pub fn policy(&self) -> &DelayPolicy {
        &self.policy
    }

    pub fn current_user_agent(&self) -> String {
        self.current_ua.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Switches to a different agent and returns it.
    pub fn rotate_user_agent(&self) -> String {
        let mut current = self.current_ua.lock().unwrap_or_else(|e| e.into_inner());
        let next = self.pool.pick_different_from(&current).to_string();
        log::debug!("HumanDelay: rotated user agent");
        *current = next.clone();
        next
    }

    /// Draws the decisions for a wait between `min` and `max` seconds.
    pub fn plan<R: Rng + ?Sized>(&self, min: f64, max: f64, rng: &mut R) -> WaitPlan {
        let scale = self.policy.time_scale.max(0.0);
        let base = uniform(rng, min, max) * scale;

        let extra = if rng.random_bool(self.policy.extra_pause_probability.clamp(0.0, 1.0)) {
            let (lo, hi) = self.policy.extra_pause;
            Some(Duration::from_secs_f64(uniform(rng, lo, hi) * scale))
        } else {
            None
        };

        WaitPlan {
            base: Duration::from_secs_f64(base),
            extra,
            rotate_user_agent: rng.random_bool(self.policy.ua_rotation_probability.clamp(0.0, 1.0)),
        }
    }

    /// Sleeps `uniform(min, max)` seconds, sometimes longer, usually rotating the UA.
    ///
    /// Dropping the future cancels the wait.
    pub async fn wait(&self, min: f64, max: f64) -> WaitPlan {
        let plan = self.plan(min, max, &mut rand::rng());

        if let Some(extra) = plan.extra {
            log::debug!("HumanDelay: extra pause of {:.1}s", extra.as_secs_f64());
        }
        tokio::time::sleep(plan.total()).await;

        if plan.rotate_user_agent {
            self.rotate_user_agent();
        }
        plan
    }

    /// Longest wait [`between_requests`](Self::between_requests) can take.
    pub fn request_ceiling(&self) -> Duration {
        let scale = self.policy.time_scale.max(0.0);
        let (lo, hi) = self.policy.request;
        let extra = if self.policy.extra_pause_probability > 0.0 {
            self.policy.extra_pause.1
        } else {
            0.0
        };
        Duration::from_secs_f64((lo.max(hi) + extra).max(0.0) * scale)
    }

    /// Gap before each platform request.
    pub async fn between_requests(&self) -> WaitPlan {
        let (min, max) = self.policy.request;
        self.wait(min, max).await
    }

    /// Gap between per-post actions.
    pub async fn between_posts(&self) -> WaitPlan {
        let (min, max) = self.policy.post;
        self.wait(min, max).await
    }

    /// Plain jittered pause without extras or rotation (typing cadence, scroll settle).
    pub async fn pause(&self, min: f64, max: f64) {
        let secs = uniform(&mut rand::rng(), min, max) * self.policy.time_scale.max(0.0);
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if hi - lo <= f64::EPSILON {
        return lo.max(0.0);
    }
    rng.random_range(lo..hi).max(0.0)
}
