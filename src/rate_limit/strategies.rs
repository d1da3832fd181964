use crate::adaptive::DynamicConfig;
use crate::clock::{Clock, SystemClock};
use crate::rate_limit::store::RequestLog;
use crate::rate_limit::{Decision, RateKey, RateLimitError, RateLimitRules, RateLimiter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default chance that an allowed request triggers a background purge.
pub const DEFAULT_CLEANUP_PROBABILITY: f64 = 0.1;

/// A sliding-window-log rate limiter.
///
/// Counts the caller's entries in the trailing window; denies once the count reaches
/// the rule's maximum, otherwise logs the request. The count and the log write are two
/// store calls, so concurrent requests from one user may both pass at the boundary.
pub struct SlidingWindowLimiter<S> {
    store: Arc<S>,
    rules: DynamicConfig<RateLimitRules>,
    clock: Arc<dyn Clock>,
    cleanup_probability: f64,
}

impl<S> std::fmt::Debug for SlidingWindowLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("rules", &*self.rules.get())
            .field("clock", &self.clock)
            .field("cleanup_probability", &self.cleanup_probability)
            .finish()
    }
}

impl<S> SlidingWindowLimiter<S>
where
    S: RequestLog + 'static,
{
    /// Limiter with the default hourly rules backed by `store`.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            rules: DynamicConfig::new(RateLimitRules::default()),
            clock: Arc::new(SystemClock),
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
        }
    }

    pub fn with_rules(mut self, rules: DynamicConfig<RateLimitRules>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Probability in `[0, 1]` that an allowed request spawns a purge of expired entries.
    pub fn with_cleanup_probability(mut self, probability: f64) -> Self {
        self.cleanup_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Live handle to the rules; updates apply to the next `acquire`.
    pub fn rules(&self) -> &DynamicConfig<RateLimitRules> {
        &self.rules
    }

    /// Best-effort, non-blocking purge of entries older than the longest window.
    fn maybe_cleanup(&self, now: DateTime<Utc>, rules: &RateLimitRules) {
        if self.cleanup_probability <= 0.0 || rand::random::<f64>() >= self.cleanup_probability {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cutoff = window_start(now, rules.longest_window());
        let store = self.store.clone();
        handle.spawn(async move {
            match store.purge_before(cutoff).await {
                Ok(removed) => {
                    tracing::debug!(target: "studyforge::limiter", removed, "purged expired request log entries")
                }
                Err(e) => {
                    tracing::debug!(target: "studyforge::limiter", error = %e, "request log purge failed")
                }
            }
        });
    }
}

/// Start of the trailing window ending at `now`.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Time until the oldest entry in the window ages out, rounded up to whole seconds.
pub fn retry_after(oldest: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> Duration {
    let age = (now - oldest).to_std().unwrap_or_default();
    let remaining = window.saturating_sub(age);
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    Duration::from_secs(secs.max(1))
}

#[async_trait]
impl<S> RateLimiter for SlidingWindowLimiter<S>
where
    S: RequestLog + 'static,
{
    async fn acquire(&self, key: RateKey) -> Result<Decision, RateLimitError> {
        let rules = self.rules.get();
        let rule = rules.rule_for(key.kind);
        let window = rule.window();
        let now = self.clock.now();
        let since = window_start(now, window);

        let stats = self
            .store
            .window_stats(key.user, key.kind, since)
            .await
            .map_err(|e| RateLimitError::Store(Box::new(e)))?;

        if stats.count >= rule.max_requests {
            let wait = retry_after(stats.oldest.unwrap_or(now), now, window);
            tracing::info!(
                target: "studyforge::limiter",
                user = %key.user,
                kind = %key.kind,
                count = stats.count,
                retry_after_secs = wait.as_secs(),
                "rate limit reached"
            );
            return Ok(Decision::Denied { wait, reason: format!("{}_window", key.kind) });
        }

        // Losing a log write only undercounts; the request still goes through.
        if let Err(e) = self.store.record(key.user, key.kind, now).await {
            tracing::warn!(
                target: "studyforge::limiter",
                user = %key.user,
                kind = %key.kind,
                error = %e,
                "failed to log request; continuing"
            );
        }

        self.maybe_cleanup(now, &rules);

        let mut metadata = HashMap::new();
        metadata.insert("limit".to_string(), rule.max_requests.to_string());
        metadata.insert("window_secs".to_string(), rule.window_secs.to_string());
        Ok(Decision::Allowed { remaining: rule.max_requests - stats.count - 1, metadata })
    }
}
