//! Bounded retry of remote operations
//!
//! [`RetryingInvoker`] runs one remote call until it succeeds, fails with a
//! non-retryable error, or its deadline passes. Backoff is capped
//! exponential with optional jitter, and a sleep never extends past the
//! deadline.

use crate::classify::ErrorClassifier;
use crate::error::{ErrorClass, LastObserved, OperationContext, ReconcileError, RemoteError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff policy between attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Exponential multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Scale each delay by a random factor in 0.5..1.5 (still capped)
    #[serde(default)]
    pub jitter: bool,
}

fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Fixed interval between attempts
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before retrying after the given (zero based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let mut delay = base.min(self.max_delay_ms as f64);
        if self.jitter {
            delay *= rand::thread_rng().gen_range(0.5..1.5);
            delay = delay.min(self.max_delay_ms as f64);
        }
        Duration::from_millis(delay as u64)
    }

    /// Longest single sleep this policy can produce
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Result of an invocation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invoked<T> {
    /// The operation returned a value
    Done(T),
    /// The operation failed with a code configured as success-equivalent
    /// (e.g. "OrderAlreadyReplaced"); carries that code
    AlreadyDone(String),
}

impl<T> Invoked<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Invoked::Done(value) => Some(value),
            Invoked::AlreadyDone(_) => None,
        }
    }
}

/// One remote call as seen by the invoker
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    pub operation: &'a str,
    pub identity: Option<&'a str>,
    pub timeout: Duration,
    pub success_codes: Option<&'a BTreeSet<String>>,
}

impl<'a> Call<'a> {
    pub fn new(operation: &'a str, timeout: Duration) -> Self {
        Self {
            operation,
            identity: None,
            timeout,
            success_codes: None,
        }
    }

    pub fn on(mut self, identity: &'a str) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn treating_as_success(mut self, codes: &'a BTreeSet<String>) -> Self {
        self.success_codes = Some(codes);
        self
    }

    fn is_success_code(&self, error: &RemoteError) -> bool {
        self.success_codes
            .is_some_and(|codes| codes.contains(&error.code))
    }

    pub(crate) fn context(&self, started: Instant) -> OperationContext {
        OperationContext::new(self.operation, self.identity, started.elapsed())
    }
}

/// Deadlines that would overflow the clock are clamped to roughly 30 years out
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `started + timeout`, saturating instead of panicking on huge timeouts
pub(crate) fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started)
}

/// Sleep for `delay`, returning `true` if the token was cancelled first
pub(crate) async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Executes remote operations with bounded retry
#[derive(Debug, Clone)]
pub struct RetryingInvoker {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryingInvoker {
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, a non-retryable error occurs or
    /// `call.timeout` elapses.
    pub async fn invoke<T, F, Fut>(
        &self,
        call: Call<'_>,
        classifier: &dyn ErrorClassifier,
        mut operation: F,
    ) -> Result<Invoked<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RemoteError>>,
    {
        let started = Instant::now();
        let deadline = deadline_after(started, call.timeout);
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled {
                    context: call.context(started),
                });
            }

            attempt += 1;
            debug!(operation = %call.operation, attempt, "Invoking remote operation");

            let error = match operation().await {
                Ok(value) => return Ok(Invoked::Done(value)),
                Err(error) => error,
            };

            if call.is_success_code(&error) {
                debug!(
                    operation = %call.operation,
                    code = %error.code,
                    "Remote error treated as success"
                );
                return Ok(Invoked::AlreadyDone(error.code));
            }

            let class = classifier.classify(&error);
            if class != ErrorClass::Retryable {
                return Err(ReconcileError::Remote {
                    context: call.context(started),
                    class,
                    error,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    operation = %call.operation,
                    attempt,
                    error = %error,
                    "Operation timed out while retrying"
                );
                return Err(ReconcileError::Timeout {
                    context: call.context(started),
                    last: LastObserved::Error(error),
                });
            }

            let delay = self
                .policy
                .delay_for_attempt(attempt - 1)
                .min(deadline - now);

            warn!(
                operation = %call.operation,
                attempt,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying"
            );

            if pause(&self.cancel, delay).await {
                return Err(ReconcileError::Cancelled {
                    context: call.context(started),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CodeClassifier;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 10000,
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(10000)); // capped
    }

    #[test]
    fn test_jitter_stays_capped() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy()
        };
        for attempt in 0..10 {
            assert!(policy.delay_for_attempt(attempt) <= policy.max_delay());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let invoker = RetryingInvoker::new(policy(), CancellationToken::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = invoker
            .invoke(
                Call::new("CreateGroup", Duration::from_secs(60)),
                &CodeClassifier::default(),
                || {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(RemoteError::new("Throttling", "slow down"))
                        } else {
                            Ok("grp-1")
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result, Invoked::Done("grp-1"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_short_circuits() {
        let invoker = RetryingInvoker::new(policy(), CancellationToken::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let err = invoker
            .invoke(
                Call::new("CreateGroup", Duration::from_secs(60)),
                &CodeClassifier::default(),
                || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(RemoteError::new("InvalidParameter", "bad name"))
                    }
                },
            )
            .await
            .unwrap_err();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err,
            ReconcileError::Remote {
                class: ErrorClass::Fatal,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_terminates_within_timeout_plus_one_interval() {
        let policy = policy();
        let invoker = RetryingInvoker::new(policy.clone(), CancellationToken::new());
        let timeout = Duration::from_secs(5);
        let started = Instant::now();

        let err = invoker
            .invoke(
                Call::new("DescribeGroup", timeout).on("gw-1:grp-1"),
                &CodeClassifier::default(),
                || async { Err::<(), _>(RemoteError::new("ServiceUnavailable", "try later")) },
            )
            .await
            .unwrap_err();

        assert!(started.elapsed() <= timeout + policy.max_delay());
        match err {
            ReconcileError::Timeout { context, last } => {
                assert_eq!(context.identity.as_deref(), Some("gw-1:grp-1"));
                assert_eq!(
                    last,
                    LastObserved::Error(RemoteError::new("ServiceUnavailable", "try later"))
                );
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_overflow() {
        let invoker = RetryingInvoker::new(policy(), CancellationToken::new());
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = invoker
            .invoke(
                Call::new("CreateGroup", Duration::MAX),
                &CodeClassifier::default(),
                || {
                    let c = c.clone();
                    async move {
                        if c.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(RemoteError::new("Throttling", "slow down"))
                        } else {
                            Ok(())
                        }
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result, Invoked::Done(()));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_code_resolves_attempt() {
        let invoker = RetryingInvoker::new(policy(), CancellationToken::new());
        let codes: BTreeSet<String> = ["OrderAlreadyReplaced".to_string()].into();

        let result = invoker
            .invoke(
                Call::new("ReplaceCertificate", Duration::from_secs(5)).treating_as_success(&codes),
                &CodeClassifier::default(),
                || async { Err::<(), _>(RemoteError::new("OrderAlreadyReplaced", "done")) },
            )
            .await
            .unwrap();

        assert_eq!(result, Invoked::AlreadyDone("OrderAlreadyReplaced".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_unblocks_backoff() {
        let cancel = CancellationToken::new();
        let invoker = RetryingInvoker::new(
            RetryPolicy::fixed(Duration::from_secs(3600)),
            cancel.clone(),
        );

        let handle = tokio::spawn(async move {
            invoker
                .invoke(
                    Call::new("DeleteGroup", Duration::from_secs(86400)),
                    &CodeClassifier::default(),
                    || async { Err::<(), _>(RemoteError::new("Throttling", "")) },
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled { .. }));
    }
}
