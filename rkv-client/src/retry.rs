//! # Reconnect Retry Policy
//!
//! Purpose: Map a reconnect attempt number to either a wait duration or a
//! stop signal. Both the single-node and the cluster transport drive their
//! reconnect loops with this policy.
//!
//! ## Design Principles
//! 1. **Pure Data**: The policy is a value; evaluating it has no side effects
//!    other than the observability hook.
//! 2. **Fixed Delay**: Every permitted attempt waits the same configured delay.
//! 3. **Shared No-Op**: Omitting the hook installs one process-wide no-op.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rkv_common::ConnectionOptions;

/// Hook invoked with the attempt number each time a retry is granted.
pub type RetryHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Returns the shared hook used whenever a caller does not supply one.
pub fn noop_hook() -> RetryHook {
    static NOOP: OnceLock<RetryHook> = OnceLock::new();
    NOOP.get_or_init(|| {
        let hook: RetryHook = Arc::new(|_attempt: u32| {});
        hook
    })
    .clone()
}

/// Outcome of evaluating the policy for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait this long, then reconnect.
    Retry(Duration),
    /// Abandon reconnection.
    Stop,
}

/// Fixed-delay, bounded-attempt reconnect policy.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    on_retry: RetryHook,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` reconnects spaced by `delay`.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            delay,
            on_retry: noop_hook(),
        }
    }

    /// Builds the policy described by connection options.
    pub fn from_options(options: &ConnectionOptions) -> Self {
        Self::new(options.retry_attempts, options.retry_delay())
    }

    /// Attaches an observability hook; `None` keeps the shared no-op.
    pub fn with_on_retry(mut self, hook: Option<RetryHook>) -> Self {
        self.on_retry = hook.unwrap_or_else(noop_hook);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Evaluates the policy for a 1-based attempt number.
    ///
    /// **Logic**:
    /// 1. `attempt > max_attempts` returns `Stop` without calling the hook.
    /// 2. Otherwise the hook observes `attempt` and the fixed delay is returned.
    pub fn compute(&self, attempt: u32) -> RetryDecision {
        if attempt > self.max_attempts {
            return RetryDecision::Stop;
        }

        (self.on_retry)(attempt);
        RetryDecision::Retry(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[test]
    fn returns_fixed_delay_within_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        for attempt in 1..=3 {
            assert_eq!(
                policy.compute(attempt),
                RetryDecision::Retry(Duration::from_millis(250))
            );
        }
    }

    #[test]
    fn stops_after_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        assert_eq!(policy.compute(4), RetryDecision::Stop);
        assert_eq!(policy.compute(u32::MAX), RetryDecision::Stop);
    }

    #[test]
    fn zero_budget_stops_immediately() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.compute(1), RetryDecision::Stop);
    }

    #[test]
    fn hook_sees_granted_attempts_only() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let policy = RetryPolicy::new(2, Duration::from_millis(5))
            .with_on_retry(Some(Arc::new(move |attempt: u32| sink.lock().unwrap().push(attempt))));

        policy.compute(1);
        policy.compute(2);
        policy.compute(3);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn evaluation_is_repeatable() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let policy = RetryPolicy::new(5, Duration::from_millis(10))
            .with_on_retry(Some(Arc::new(move |_: u32| {
                counter.fetch_add(1, Ordering::Relaxed);
            })));

        let first = policy.compute(2);
        let second = policy.compute(2);
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn omitted_hook_uses_shared_noop() {
        let policy = RetryPolicy::new(1, Duration::ZERO).with_on_retry(None);
        assert!(Arc::ptr_eq(&policy.on_retry, &noop_hook()));
        assert!(Arc::ptr_eq(&noop_hook(), &noop_hook()));
    }

    #[test]
    fn options_drive_defaults() {
        let policy = RetryPolicy::from_options(&ConnectionOptions::default());
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay(), Duration::from_millis(3000));
    }
}
