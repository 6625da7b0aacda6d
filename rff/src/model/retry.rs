//! Retry decorator around a [`LanguageModel`].
//!
//! Retry and backoff live here, outside the controller, so the policy can
//! change without touching control flow.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::CompletionError;
use crate::model::{CompletionOptions, LanguageModel};

/// How many times, and how long apart, a failed completion is retried.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// Fail immediately on error.
    None,
    /// Constant delay between attempts.
    Fixed {
        max_retries: u32,
        interval: Duration,
    },
    /// Exponentially increasing delays, capped at `max_interval`.
    Exponential {
        max_retries: u32,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        RetryPolicy::Fixed {
            max_retries,
            interval,
        }
    }

    pub fn exponential(
        max_retries: u32,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    ) -> Self {
        RetryPolicy::Exponential {
            max_retries,
            initial_interval,
            max_interval,
            multiplier,
        }
    }

    /// True if retry number `retry` (0-based) is still allowed.
    pub fn should_retry(&self, retry: u32) -> bool {
        retry < self.max_retries()
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { interval, .. } => *interval,
            RetryPolicy::Exponential {
                initial_interval,
                max_interval,
                multiplier,
                ..
            } => {
                let secs = initial_interval.as_secs_f64() * multiplier.powi(retry as i32);
                if !secs.is_finite() {
                    return *max_interval;
                }
                Duration::from_secs_f64(secs.max(0.0)).min(*max_interval)
            }
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::Exponential { max_retries, .. } => *max_retries,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::None
    }
}

/// Model wrapper that retries transient [`CompletionError`]s with backoff.
#[derive(Debug, Clone)]
pub struct RetryingModel<M> {
    inner: M,
    policy: RetryPolicy,
}

impl<M: LanguageModel> RetryingModel<M> {
    pub fn new(inner: M, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<M: LanguageModel> LanguageModel for RetryingModel<M> {
    fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let mut retry = 0u32;
        loop {
            match self.inner.complete(prompt, options) {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && self.policy.should_retry(retry) => {
                    let delay = self.policy.delay(retry);
                    warn!(err = %err, retry, delay_ms = delay.as_millis() as u64, "completion failed, retrying");
                    thread::sleep(delay);
                    retry += 1;
                }
                Err(err) => {
                    debug!(err = %err, retries = retry, "completion failed, giving up");
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn options() -> CompletionOptions {
        CompletionOptions {
            model: "test".to_string(),
            temperature: 0.0,
        }
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let policy =
            RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(3), 2.0);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(3));
    }

    #[test]
    fn none_policy_never_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(0));
        assert_eq!(policy.delay(0), Duration::ZERO);
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let flaky = |_: &str, _: &CompletionOptions| -> Result<String, CompletionError> {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CompletionError::Timeout { secs: 1 })
            } else {
                Ok("ok".to_string())
            }
        };
        let model = RetryingModel::new(flaky, RetryPolicy::fixed(3, Duration::ZERO));

        assert_eq!(model.complete("p", &options()).expect("complete"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let broken = |_: &str, _: &CompletionOptions| -> Result<String, CompletionError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CompletionError::Empty)
        };
        let model = RetryingModel::new(broken, RetryPolicy::fixed(2, Duration::ZERO));

        let err = model.complete("p", &options()).unwrap_err();
        assert_eq!(err, CompletionError::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn does_not_retry_misconfiguration() {
        let seen = Mutex::new(Vec::new());
        let misconfigured = |prompt: &str, _: &CompletionOptions| -> Result<String, CompletionError> {
            seen.lock().expect("lock").push(prompt.to_string());
            Err(CompletionError::Misconfigured("no command".to_string()))
        };
        let model = RetryingModel::new(misconfigured, RetryPolicy::fixed(5, Duration::ZERO));

        assert!(model.complete("p", &options()).is_err());
        assert_eq!(seen.lock().expect("lock").len(), 1);
    }
}
