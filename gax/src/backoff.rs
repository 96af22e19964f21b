use std::time::Duration;

use rand::Rng;

/// Configuration for [`ExponentialBackoff`] (component A, §4.1).
#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    /// D₀: initial delay.
    pub initial_delay: Duration,
    /// f: growth factor applied to the base delay each attempt.
    pub factor: f64,
    /// D_max: delay ceiling.
    pub max_delay: Duration,
    /// j ∈ [0, 1]: jitter fraction applied as ±0.5·j·base.
    pub jitter: f64,
    /// N: maximum number of attempts before `wait()` returns *exhausted*.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            factor: 1.5,
            max_delay: Duration::from_secs(60),
            jitter: 1.0,
            max_attempts: 10,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffError {
    #[error("exponential backoff exhausted after the configured maximum attempts")]
    Exhausted,
    #[error("a wait() call is already in flight on this backoff instance")]
    AlreadyWaiting,
}

/// Exponential backoff with jitter, as specified in §4.1.
///
/// Not `Clone`: an in-flight `wait()` borrows the instance mutably (`&mut self`),
/// which already prevents the "concurrent waits" case at compile time for a
/// single-threaded caller. The `waiting` flag exists for the case where the
/// scheduler (the bulk-write engine's actor, §9) holds a shared handle behind
/// a lock and wants an explicit error instead of a deadlock.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
    base: Duration,
    waiting: bool,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            base: Duration::ZERO,
            waiting: false,
        }
    }

    /// Attempt count since construction or the last `reset()`.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Schedules the next attempt's delay per §4.1 and §8's quantified invariant.
    ///
    /// The first call after construction (or after `reset()`) returns zero.
    pub fn wait(&mut self) -> Result<Duration, BackoffError> {
        if self.waiting {
            return Err(BackoffError::AlreadyWaiting);
        }
        if self.attempt >= self.config.max_attempts {
            return Err(BackoffError::Exhausted);
        }
        self.waiting = true;
        let delay = if self.attempt == 0 {
            Duration::ZERO
        } else if self.base.is_zero() {
            // base_1 = D0, per §8's quantified invariant (n = 1 case).
            self.base = self.config.initial_delay;
            jittered(self.base, self.config.jitter)
        } else {
            let grown = self.base.mul_f64(self.config.factor);
            self.base = grown.clamp(self.config.initial_delay, self.config.max_delay);
            jittered(self.base, self.config.jitter)
        };
        self.attempt += 1;
        self.waiting = false;
        Ok(delay)
    }

    /// Resets attempt count and base delay to zero; the next `wait()` returns zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.base = Duration::ZERO;
        self.waiting = false;
    }

    /// Jumps the base delay straight to `D_max`, used after a RESOURCE_EXHAUSTED
    /// signal (§4.6.4) so the next retry waits the maximum delay plus jitter.
    pub fn reset_to_max(&mut self) {
        self.base = self.config.max_delay;
        self.attempt = self.attempt.max(1);
    }

    /// The delay that the *next* `wait()` would schedule, without consuming an
    /// attempt. Used by the bulk-write dispatcher to compute a batch's delay
    /// floor (§4.6.3 step 2) without perturbing retry state.
    pub fn peek_base(&self) -> Duration {
        self.base
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let half_spread = 0.5 * jitter;
    let factor = rand::thread_rng().gen_range(-half_spread..=half_spread);
    let nanos = base.as_nanos() as f64 * (1.0 + factor);
    Duration::from_nanos(nanos.max(0.0) as u64)
}
