//! Token-bucket rate limiter layered over sliding-window counters (C2).
//!
//! Grounded on the teacher's `rate_limiter.rs` (sliding-window `VecDeque` of
//! `Instant`s) and `apis/client.rs` (semaphore-gated `RateLimiter::acquire`
//! returning an RAII guard). This version adds the token-bucket burst layer and
//! the multi-window (`per_second`/`per_minute`/`per_hour`) check the spec calls
//! for, and folds in `Retry-After` / `X-RateLimit-Reset` response hints.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// One sliding window: at most `limit` timestamps may fall within `window`.
struct SlidingWindow {
    window: Duration,
    limit: usize,
    events: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            events: VecDeque::new(),
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&front) = self.events.front() {
            if now.duration_since(front) <= self.window {
                break;
            }
            self.events.pop_front();
        }
    }

    /// How long the caller must wait before this window would admit one more
    /// event, given its current contents. `Duration::ZERO` means "now".
    fn wait_until_available(&mut self, now: Instant) -> Duration {
        self.evict_expired(now);
        if self.events.len() < self.limit {
            return Duration::ZERO;
        }
        let oldest = *self.events.front().expect("len >= limit > 0 implies non-empty");
        self.window.saturating_sub(now.duration_since(oldest))
    }

    fn record(&mut self, now: Instant) {
        self.events.push_back(now);
    }
}

/// Token bucket: continuous refill at `requests_per_second`, capacity `burst_limit`.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(requests_per_second: f64, burst_limit: f64) -> Self {
        Self {
            capacity: burst_limit.max(1.0),
            tokens: burst_limit.max(1.0),
            refill_per_sec: requests_per_second,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Duration until at least one token is available, without consuming it.
    fn wait_until_available(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 {
            return Duration::from_secs(u64::MAX / 2);
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.refill_per_sec)
    }

    fn consume(&mut self, now: Instant) {
        self.refill(now);
        self.tokens = (self.tokens - 1.0).max(0.0);
    }
}

/// Hints parsed out of a provider's HTTP response headers (spec §4.1 `onResponse`).
#[derive(Debug, Clone, Default)]
pub struct RateLimitHints {
    /// `Retry-After` in seconds (or a parsed HTTP-date delta — callers resolve that
    /// before constructing this).
    pub retry_after_secs: Option<u64>,
    /// `X-RateLimit-Reset`-style epoch seconds.
    pub reset_at_epoch_secs: Option<u64>,
}

/// Per-provider rate limiter: token bucket (burst) + up to three sliding windows.
/// FIFO fairness among waiters falls out of the `Mutex` + re-check loop: whichever
/// task re-acquires the lock first after a sleep wins, and ties are broken by
/// tokio's own FIFO-ish mutex queueing.
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
    per_second: Option<Mutex<SlidingWindow>>,
    per_minute: Option<Mutex<SlidingWindow>>,
    per_hour: Option<Mutex<SlidingWindow>>,
    preempt_until: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_second: f64,
    pub burst_limit: f64,
    pub requests_per_minute: Option<usize>,
    pub requests_per_hour: Option<usize>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst_limit: 1.0,
            requests_per_minute: None,
            requests_per_hour: None,
        }
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(config.requests_per_second, config.burst_limit)),
            per_second: if config.requests_per_second > 0.0 {
                Some(Mutex::new(SlidingWindow::new(
                    config.requests_per_second.ceil() as usize,
                    Duration::from_secs(1),
                )))
            } else {
                None
            },
            per_minute: config.requests_per_minute.map(|limit| {
                Mutex::new(SlidingWindow::new(limit, Duration::from_secs(60)))
            }),
            per_hour: config
                .requests_per_hour
                .map(|limit| Mutex::new(SlidingWindow::new(limit, Duration::from_secs(3600)))),
            preempt_until: Mutex::new(None),
        }
    }

    /// Cooperatively waits until a token is available under the bucket *and*
    /// every configured sliding window, then reserves the slot. Returns how long
    /// the caller actually waited.
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        loop {
            let preempt = *self.preempt_until.lock().await;
            if let Some(until) = preempt {
                let now = Instant::now();
                if now < until {
                    tokio::time::sleep(until - now).await;
                    continue;
                }
            }

            let now = Instant::now();
            let mut longest_wait = Duration::ZERO;

            {
                let mut bucket = self.bucket.lock().await;
                longest_wait = longest_wait.max(bucket.wait_until_available(now));
            }
            for window in [&self.per_second, &self.per_minute, &self.per_hour]
                .into_iter()
                .flatten()
            {
                let mut w = window.lock().await;
                longest_wait = longest_wait.max(w.wait_until_available(now));
            }

            if longest_wait > Duration::ZERO {
                tokio::time::sleep(longest_wait).await;
                continue;
            }

            let now = Instant::now();
            self.bucket.lock().await.consume(now);
            for window in [&self.per_second, &self.per_minute, &self.per_hour]
                .into_iter()
                .flatten()
            {
                window.lock().await.record(now);
            }
            return start.elapsed();
        }
    }

    /// Parses provider response hints and pre-empts future `acquire` calls until
    /// the hinted reset time, so we don't burn a retry just to get a 429 again.
    pub async fn on_response(&self, hints: RateLimitHints) {
        let now_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let delay = if let Some(secs) = hints.retry_after_secs {
            Some(Duration::from_secs(secs))
        } else {
            hints
                .reset_at_epoch_secs
                .filter(|&reset| reset > now_epoch)
                .map(|reset| Duration::from_secs(reset - now_epoch))
        };

        if let Some(delay) = delay {
            let mut preempt = self.preempt_until.lock().await;
            let until = Instant::now() + delay;
            if preempt.map(|existing| until > existing).unwrap_or(true) {
                *preempt = Some(until);
            }
        }
    }
}
