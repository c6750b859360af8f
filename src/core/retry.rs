//! Bounded retries for stage invocations.
//!
//! Only thrown faults are retried. A stage that returns a rejection is done,
//! unless the policy explicitly opts into `retry_rejections`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Context, StageOutput, TraceBuffer, TraceKind};

use super::stage::Stage;

/// Retry policy for stage invocations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (0 = retry immediately)
    #[serde(default)]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Also retry stages that report `ERROR` themselves
    #[serde(default)]
    pub retry_rejections: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: 0,
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            retry_rejections: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt bound and no delay
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Effective attempt bound; anything below 1 still runs once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Calculate delay before the retry following `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts()
    }
}

/// A result together with the number of invocations it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Every attempt raised; carries the last error
#[derive(Debug, Error)]
#[error("stage '{stage}' failed after {attempts} attempt(s): {message}")]
pub struct RetriesExhausted {
    pub stage: String,
    pub attempts: u32,
    pub message: String,
    #[source]
    pub source: anyhow::Error,
}

/// Invoke `stage` until it returns, or until the policy's bound is reached.
///
/// Trace entries from every attempt accumulate in `trace`; each thrown
/// attempt also leaves an `ATTEMPT_FAILED` entry.
pub async fn invoke(
    stage: &dyn Stage,
    context: &Context,
    policy: &RetryPolicy,
    trace: &mut TraceBuffer,
) -> Result<Attempted<StageOutput>, RetriesExhausted> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(stage = trace.stage(), attempt, "Invoking stage");

        match stage.process(context, trace).await {
            Ok(output) if output.is_rejection()
                && policy.retry_rejections
                && policy.should_retry(attempt) =>
            {
                warn!(
                    stage = trace.stage(),
                    attempt,
                    "Stage rejected its output, retrying under retry_rejections policy"
                );
                pause(policy, attempt).await;
            }
            Ok(output) => {
                return Ok(Attempted {
                    value: output,
                    attempts: attempt,
                });
            }
            Err(err) => {
                let message = format!("{:#}", err);
                trace.record(
                    TraceKind::AttemptFailed,
                    json!({ "attempt": attempt, "error": message }),
                );

                if !policy.should_retry(attempt) {
                    return Err(RetriesExhausted {
                        stage: trace.stage().to_string(),
                        attempts: attempt,
                        message,
                        source: err,
                    });
                }

                warn!(
                    stage = trace.stage(),
                    attempt,
                    max_attempts = policy.attempts(),
                    error = %message,
                    "Stage failed, retrying"
                );
                pause(policy, attempt).await;
            }
        }
    }
}

async fn pause(policy: &RetryPolicy, attempt: u32) {
    let delay = policy.delay_for_attempt(attempt);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::domain::State;

    /// Throws `failures` times, then succeeds
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Stage for Flaky {
        async fn process(
            &self,
            _context: &Context,
            trace: &mut TraceBuffer,
        ) -> anyhow::Result<StageOutput> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            trace.record(TraceKind::Prompt, format!("call {}", call));
            if call <= self.failures {
                anyhow::bail!("service unreachable (call {})", call);
            }
            Ok(StageOutput::new(State::RequirementsWritten))
        }
    }

    struct Rejecting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Stage for Rejecting {
        async fn process(
            &self,
            _context: &Context,
            _trace: &mut TraceBuffer,
        ) -> anyhow::Result<StageOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StageOutput::rejected("review", "no"))
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
        assert_eq!(RetryPolicy::default().delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn test_attempt_bound_floor() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[tokio::test]
    async fn test_succeeds_within_bound() {
        let stage = Flaky::new(2);
        let mut trace = TraceBuffer::for_stage("flaky");

        let result = invoke(
            &stage,
            &Context::new("x"),
            &RetryPolicy::with_max_attempts(3),
            &mut trace,
        )
        .await
        .unwrap();

        assert_eq!(result.attempts, 3);
        assert_eq!(result.value.state, State::RequirementsWritten);
        assert_eq!(trace.count(TraceKind::Prompt), 3);
        assert_eq!(trace.count(TraceKind::AttemptFailed), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_last_error() {
        let stage = Flaky::new(5);
        let mut trace = TraceBuffer::for_stage("flaky");

        let err = invoke(
            &stage,
            &Context::new("x"),
            &RetryPolicy::with_max_attempts(2),
            &mut trace,
        )
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 2);
        assert_eq!(err.stage, "flaky");
        assert!(err.message.contains("call 2"));
        assert_eq!(stage.calls.load(Ordering::SeqCst), 2);
        assert_eq!(trace.count(TraceKind::AttemptFailed), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried_by_default() {
        let stage = Rejecting {
            calls: AtomicU32::new(0),
        };
        let mut trace = TraceBuffer::for_stage("critic");

        let result = invoke(&stage, &Context::new("x"), &RetryPolicy::default(), &mut trace)
            .await
            .unwrap();

        assert!(result.value.is_rejection());
        assert_eq!(result.attempts, 1);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_retried_when_opted_in() {
        let stage = Rejecting {
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy {
            retry_rejections: true,
            ..RetryPolicy::with_max_attempts(3)
        };
        let mut trace = TraceBuffer::for_stage("critic");

        let result = invoke(&stage, &Context::new("x"), &policy, &mut trace)
            .await
            .unwrap();

        assert!(result.value.is_rejection());
        assert_eq!(result.attempts, 3);
        assert_eq!(stage.calls.load(Ordering::SeqCst), 3);
    }
}
