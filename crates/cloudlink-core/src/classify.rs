//! Remote error classification
//!
//! Backoff policy lives in [`crate::retry`]; what counts as transient lives
//! here. A classifier maps each [`RemoteError`] to an [`ErrorClass`].

use crate::error::{ErrorClass, RemoteError};

/// Decides how a remote failure is treated
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &RemoteError) -> ErrorClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&RemoteError) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &RemoteError) -> ErrorClass {
        self(error)
    }
}

/// Classifier driven by error-code patterns
///
/// A pattern matches a code when the code equals it, starts with
/// `"<pattern>."` or ends with `".<pattern>"`. So `NotFound` matches
/// `InvalidGroup.NotFound` and `ResourceNotFound` matches
/// `ResourceNotFound.Gateway`. Not-found patterns are checked first, then
/// conflict, then retryable; anything unmatched is fatal.
#[derive(Debug, Clone)]
pub struct CodeClassifier {
    not_found: Vec<String>,
    conflict: Vec<String>,
    retryable: Vec<String>,
}

impl CodeClassifier {
    /// A classifier with no patterns: everything is fatal
    pub fn empty() -> Self {
        Self {
            not_found: Vec::new(),
            conflict: Vec::new(),
            retryable: Vec::new(),
        }
    }

    pub fn with_not_found(mut self, pattern: impl Into<String>) -> Self {
        self.not_found.push(pattern.into());
        self
    }

    pub fn with_conflict(mut self, pattern: impl Into<String>) -> Self {
        self.conflict.push(pattern.into());
        self
    }

    pub fn with_retryable(mut self, pattern: impl Into<String>) -> Self {
        self.retryable.push(pattern.into());
        self
    }

    fn matches(patterns: &[String], code: &str) -> bool {
        patterns.iter().any(|p| {
            code == p
                || code
                    .strip_prefix(p.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
                || code
                    .strip_suffix(p.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        })
    }
}

impl Default for CodeClassifier {
    fn default() -> Self {
        Self::empty()
            .with_not_found("NotFound")
            .with_not_found("ResourceNotFound")
            .with_not_found("EntityNotExist")
            .with_conflict("Conflict")
            .with_conflict("ConcurrentModification")
            .with_conflict("OperationConflict")
            .with_retryable("Throttling")
            .with_retryable("ServiceUnavailable")
            .with_retryable("InternalError")
            .with_retryable("SystemBusy")
            .with_retryable("IncorrectStatus")
            .with_retryable("RequestTimeout")
    }
}

impl ErrorClassifier for CodeClassifier {
    fn classify(&self, error: &RemoteError) -> ErrorClass {
        let code = error.code.as_str();
        if Self::matches(&self.not_found, code) {
            ErrorClass::NotFound
        } else if Self::matches(&self.conflict, code) {
            ErrorClass::Conflict
        } else if Self::matches(&self.retryable, code) {
            ErrorClass::Retryable
        } else {
            ErrorClass::Fatal
        }
    }
}
