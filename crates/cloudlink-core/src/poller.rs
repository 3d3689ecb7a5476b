//! Waiting for asynchronous remote state transitions
//!
//! Many mutating calls return before the resource is usable. The poller
//! fetches the status until it lands in a success state, a failure state, or
//! the wait deadline passes. Fetch errors go through the same classifier as
//! the invoker, so a transient error does not abort the wait.

use crate::classify::ErrorClassifier;
use crate::error::{ErrorClass, LastObserved, OperationContext, ReconcileError, RemoteError, Result};
use crate::retry::{deadline_after, pause};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a not-found status query means while waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundPolicy {
    /// Not visible yet; keep waiting (after create)
    Pending,
    /// Gone is the goal (after delete)
    Success,
    /// The resource vanished underneath us
    Fatal,
}

/// Terminal state partitions for one wait
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollTarget {
    pub success: BTreeSet<String>,
    #[serde(default)]
    pub failure: BTreeSet<String>,
    #[serde(default = "default_not_found")]
    pub not_found: NotFoundPolicy,
}

fn default_not_found() -> NotFoundPolicy {
    NotFoundPolicy::Fatal
}

impl PollTarget {
    pub fn new<I, S>(success: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: success.into_iter().map(Into::into).collect(),
            failure: BTreeSet::new(),
            not_found: default_not_found(),
        }
    }

    pub fn with_failure<I, S>(mut self, failure: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure.extend(failure.into_iter().map(Into::into));
        self
    }

    pub fn when_not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.not_found = policy;
        self
    }

    /// Typical target after a delete: `Deleted`, or the resource is gone
    pub fn deleted() -> Self {
        Self::new(["Deleted"]).when_not_found(NotFoundPolicy::Success)
    }

    /// A target has to be reachable: either some success state or a
    /// not-found that counts as success.
    pub fn validate(&self) -> Result<()> {
        if self.success.is_empty() && self.not_found != NotFoundPolicy::Success {
            return Err(ReconcileError::InvalidPollTarget(
                "no success state and not-found is not success".to_string(),
            ));
        }
        if let Some(state) = self.success.intersection(&self.failure).next() {
            return Err(ReconcileError::InvalidPollTarget(format!(
                "state '{}' is both success and failure",
                state
            )));
        }
        Ok(())
    }
}

/// How a successful wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A success state was observed
    Reached(String),
    /// The resource disappeared and the target counts that as success
    Gone,
}

/// Polls a status query until a terminal state
#[derive(Debug, Clone)]
pub struct StatePoller {
    interval: Duration,
    cancel: CancellationToken,
}

impl StatePoller {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn wait_for<F, Fut>(
        &self,
        operation: &str,
        identity: Option<&str>,
        target: &PollTarget,
        max_wait: Duration,
        classifier: &dyn ErrorClassifier,
        mut fetch: F,
    ) -> Result<PollOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<String, RemoteError>>,
    {
        target.validate()?;

        let started = Instant::now();
        let deadline = deadline_after(started, max_wait);
        let context = || OperationContext::new(operation, identity, started.elapsed());
        let mut last = LastObserved::Nothing;
        let mut fetches = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled { context: context() });
            }

            fetches += 1;
            match fetch().await {
                Ok(state) => {
                    if target.success.contains(&state) {
                        debug!(operation, state = %state, fetches, "Reached target state");
                        return Ok(PollOutcome::Reached(state));
                    }
                    if target.failure.contains(&state) {
                        return Err(ReconcileError::ResourceEnteredFailureState {
                            context: context(),
                            state,
                        });
                    }
                    debug!(operation, state = %state, fetches, "Still waiting");
                    last = LastObserved::State(state);
                }
                Err(error) => match classifier.classify(&error) {
                    ErrorClass::Retryable => {
                        debug!(operation, error = %error, "Transient status error");
                        last = LastObserved::Error(error);
                    }
                    ErrorClass::NotFound => match target.not_found {
                        NotFoundPolicy::Success => {
                            debug!(operation, fetches, "Resource gone");
                            return Ok(PollOutcome::Gone);
                        }
                        NotFoundPolicy::Pending => {
                            debug!(operation, "Resource not visible yet");
                            last = LastObserved::Error(error);
                        }
                        NotFoundPolicy::Fatal => {
                            return Err(ReconcileError::Remote {
                                context: context(),
                                class: ErrorClass::NotFound,
                                error,
                            });
                        }
                    },
                    class => {
                        return Err(ReconcileError::Remote {
                            context: context(),
                            class,
                            error,
                        });
                    }
                },
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReconcileError::Timeout {
                    context: context(),
                    last,
                });
            }

            if pause(&self.cancel, self.interval.min(deadline - now)).await {
                return Err(ReconcileError::Cancelled { context: context() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CodeClassifier;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    type Script = Arc<Mutex<VecDeque<std::result::Result<String, RemoteError>>>>;

    fn script(items: Vec<std::result::Result<&str, RemoteError>>) -> Script {
        Arc::new(Mutex::new(
            items.into_iter().map(|r| r.map(str::to_string)).collect(),
        ))
    }

    fn poller() -> StatePoller {
        StatePoller::new(Duration::from_secs(2), CancellationToken::new())
    }

    async fn run(
        target: &PollTarget,
        max_wait: Duration,
        script: &Script,
    ) -> (Result<PollOutcome>, usize) {
        let calls = Arc::new(Mutex::new(0usize));
        let result = poller()
            .wait_for(
                "DescribeGroup",
                Some("gw-1:grp-1"),
                target,
                max_wait,
                &CodeClassifier::default(),
                || {
                    *calls.lock().unwrap() += 1;
                    let next = script
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or_else(|| Ok("Pending".to_string()));
                    async move { next }
                },
            )
            .await;
        let count = *calls.lock().unwrap();
        (result, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_pending() {
        let target = PollTarget::new(["Open"]).with_failure(["Failed"]);
        let script = script(vec![Ok("Pending"), Ok("Pending"), Ok("Open")]);

        let (result, fetches) = run(&target, Duration::from_secs(60), &script).await;

        assert_eq!(result.unwrap(), PollOutcome::Reached("Open".to_string()));
        assert_eq!(fetches, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_state_stops_immediately() {
        let target = PollTarget::new(["Open"]).with_failure(["Failed"]);
        let script = script(vec![Ok("Failed")]);

        let (result, fetches) = run(&target, Duration::from_secs(60), &script).await;

        assert_eq!(fetches, 1);
        match result {
            Err(ReconcileError::ResourceEnteredFailureState { state, context }) => {
                assert_eq!(state, "Failed");
                assert_eq!(context.identity.as_deref(), Some("gw-1:grp-1"));
            }
            other => panic!("expected failure state, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_keep_waiting() {
        let target = PollTarget::new(["Open"]);
        let script = script(vec![
            Err(RemoteError::new("Throttling", "")),
            Ok("Creating"),
            Ok("Open"),
        ]);

        let (result, fetches) = run(&target, Duration::from_secs(60), &script).await;

        assert!(result.is_ok());
        assert_eq!(fetches, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_wait() {
        let target = PollTarget::new(["Open"]);
        let script = script(vec![Ok("Creating"), Ok("Open")]);

        let (result, fetches) = run(&target, Duration::MAX, &script).await;

        assert_eq!(result.unwrap(), PollOutcome::Reached("Open".to_string()));
        assert_eq!(fetches, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_policies() {
        let gone = script(vec![Ok("Deleting"), Err(RemoteError::new("ResourceNotFound", ""))]);
        let (result, _) = run(&PollTarget::deleted(), Duration::from_secs(60), &gone).await;
        assert_eq!(result.unwrap(), PollOutcome::Gone);

        let pending = script(vec![Err(RemoteError::new("ResourceNotFound", "")), Ok("Open")]);
        let target = PollTarget::new(["Open"]).when_not_found(NotFoundPolicy::Pending);
        let (result, fetches) = run(&target, Duration::from_secs(60), &pending).await;
        assert!(result.is_ok());
        assert_eq!(fetches, 2);

        let fatal = script(vec![Err(RemoteError::new("ResourceNotFound", ""))]);
        let (result, _) = run(&PollTarget::new(["Open"]), Duration::from_secs(60), &fatal).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_state() {
        let target = PollTarget::new(["Open"]);
        let script = script(vec![]);

        let (result, _) = run(&target, Duration::from_secs(10), &script).await;

        match result {
            Err(ReconcileError::Timeout { last, .. }) => {
                assert_eq!(last, LastObserved::State("Pending".to_string()));
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_target_rejected_without_fetch() {
        let target = PollTarget::new(Vec::<String>::new()).with_failure(["Failed"]);
        let script = script(vec![]);

        let (result, fetches) = run(&target, Duration::from_secs(10), &script).await;

        assert!(matches!(result, Err(ReconcileError::InvalidPollTarget(_))));
        assert_eq!(fetches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_not_timeout() {
        let cancel = CancellationToken::new();
        let poller = StatePoller::new(Duration::from_secs(30), cancel.clone());
        cancel.cancel();

        let result = poller
            .wait_for(
                "DescribeGroup",
                None,
                &PollTarget::new(["Open"]),
                Duration::from_secs(60),
                &CodeClassifier::default(),
                || async { Ok("Pending".to_string()) },
            )
            .await;

        assert!(matches!(result, Err(ReconcileError::Cancelled { .. })));
    }
}
