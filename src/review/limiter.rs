//! Token-bucket limiter shared by every in-flight analyzer call.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::AnalysisError;

/// Token precision: one token is 1000 scaled units.
const SCALE: u64 = 1000;

/// What to do when the bucket is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    /// Wait until a token is available.
    #[default]
    Block,
    /// Fail fast and retry a bounded number of times.
    Reject,
}

impl fmt::Display for LimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitPolicy::Block => write!(f, "block"),
            LimitPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for LimitPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(LimitPolicy::Block),
            "reject" => Ok(LimitPolicy::Reject),
            _ => anyhow::bail!("Invalid limit policy '{}'. Valid values: block, reject", s),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Token bucket: refills at `rate` tokens per second up to `burst`.
///
/// A rate of zero disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rate: u64,
    burst: u64,
    policy: LimitPolicy,
    reject_retries: u32,
}

impl RateLimiter {
    pub fn new(rate: u64, burst: u64, policy: LimitPolicy) -> Self {
        let burst = burst.max(1);
        Self {
            state: Mutex::new(BucketState {
                tokens: burst.saturating_mul(SCALE),
                last_refill: Instant::now(),
            }),
            rate,
            burst,
            policy,
            reject_retries: 3,
        }
    }

    /// A limiter that never throttles.
    pub fn unlimited() -> Self {
        Self::new(0, 1, LimitPolicy::Block)
    }

    pub fn with_reject_retries(mut self, retries: u32) -> Self {
        self.reject_retries = retries;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.rate > 0
    }

    pub fn policy(&self) -> LimitPolicy {
        self.policy
    }

    /// Credit whole elapsed milliseconds; the sub-millisecond remainder
    /// carries over to the next refill.
    fn refill(&self, state: &mut BucketState) {
        let elapsed = Instant::now().duration_since(state.last_refill);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if elapsed_ms > 0 {
            let credit = elapsed_ms.saturating_mul(self.rate);
            state.tokens = state
                .tokens
                .saturating_add(credit)
                .min(self.burst.saturating_mul(SCALE));
            state.last_refill += Duration::from_millis(elapsed_ms);
        }
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if !self.is_enabled() {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state);
        if state.tokens >= SCALE {
            state.tokens -= SCALE;
            return Ok(());
        }
        let missing = SCALE - state.tokens;
        let wait_ms = missing.div_ceil(self.rate).max(1);
        Err(Duration::from_millis(wait_ms))
    }

    /// Whole tokens currently available.
    pub fn available_tokens(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state);
        state.tokens / SCALE
    }

    /// Acquire a token according to the configured policy.
    ///
    /// Under `Block` this waits until a token frees up; under `Reject` it
    /// retries with doubling backoff and fails with `RateLimited` once the
    /// retry budget is spent. Cancellation wins over waiting in both cases.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AnalysisError> {
        let mut attempts = 0u32;
        let mut backoff = Duration::from_millis(50);
        loop {
            if cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            attempts += 1;
            let sleep_for = match self.policy {
                LimitPolicy::Block => wait,
                LimitPolicy::Reject => {
                    if attempts > self.reject_retries {
                        return Err(AnalysisError::RateLimited { attempts });
                    }
                    tracing::debug!(attempts, backoff_ms = backoff.as_millis() as u64, "Rate limited, retrying");
                    let delay = backoff.max(wait);
                    backoff = backoff.saturating_mul(2);
                    delay
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(AnalysisError::Cancelled),
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}
