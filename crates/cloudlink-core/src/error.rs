//! Reconciliation error types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a remote API call
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct RemoteError {
    /// Opaque error code (e.g. "ResourceNotFound.Group")
    pub code: String,

    /// Human readable message, passed through verbatim
    pub message: String,

    /// Request id assigned by the remote side, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// How the core treats a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient: network blip, throttling, "not ready yet"
    Retryable,
    /// The addressed resource does not exist
    NotFound,
    /// Concurrent conflicting mutation; never retried
    Conflict,
    /// Anything else
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::NotFound => write!(f, "not found"),
            ErrorClass::Conflict => write!(f, "conflict"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Where an operational failure happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    pub operation: String,
    pub identity: Option<String>,
    pub elapsed: Duration,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>, identity: Option<&str>, elapsed: Duration) -> Self {
        Self {
            operation: operation.into(),
            identity: identity.map(str::to_string),
            elapsed,
        }
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        if let Some(identity) = &self.identity {
            write!(f, " on '{}'", identity)?;
        }
        write!(f, " after {:.1}s", self.elapsed.as_secs_f64())
    }
}

/// Last thing observed before a deadline ran out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LastObserved {
    Error(RemoteError),
    State(String),
    Nothing,
}

impl fmt::Display for LastObserved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastObserved::Error(e) => write!(f, "error {}", e),
            LastObserved::State(s) => write!(f, "state '{}'", s),
            LastObserved::Nothing => write!(f, "nothing"),
        }
    }
}

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("{context}: {class} remote error {error}")]
    Remote {
        context: OperationContext,
        class: ErrorClass,
        #[source]
        error: RemoteError,
    },

    #[error("{context}: resource entered failure state '{state}'")]
    ResourceEnteredFailureState {
        context: OperationContext,
        state: String,
    },

    #[error("{context}: timed out, last observed {last}")]
    Timeout {
        context: OperationContext,
        last: LastObserved,
    },

    #[error("{context}: cancelled")]
    Cancelled { context: OperationContext },

    #[error("{context}: resource no longer exists")]
    ResourceGone { context: OperationContext },

    #[error(
        "Immutable field '{field}' of {kind}{} cannot change ({old} -> {new})",
        on_identity(.identity)
    )]
    ImmutableFieldChanged {
        kind: String,
        identity: Option<String>,
        field: String,
        old: String,
        new: String,
    },

    #[error("Malformed identity '{id}': expected {expected} segments, found {found}")]
    MalformedIdentity {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid identity part '{part}': {reason}")]
    InvalidIdentityPart { part: String, reason: &'static str },

    #[error("Invalid field '{field}': expected {expected}, found {found}")]
    InvalidField {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("Missing field '{field}' for {operation}")]
    MissingField { field: String, operation: String },

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("Resource kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: String, found: String },

    #[error("Invalid poll target: {0}")]
    InvalidPollTarget(String),

    #[error("Create of {kind} failed: {source}")]
    CreateFailed {
        kind: String,
        /// Set when the resource exists remotely despite the failure
        identity: Option<String>,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("State file error: {0}")]
    State(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Classification of the underlying remote failure, if there is one
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            ReconcileError::Remote { class, .. } => Some(*class),
            ReconcileError::CreateFailed { source, .. } => source.class(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == Some(ErrorClass::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        self.class() == Some(ErrorClass::Conflict)
    }

    /// The last remote error this failure carries
    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self {
            ReconcileError::Remote { error, .. } => Some(error),
            ReconcileError::Timeout {
                last: LastObserved::Error(error),
                ..
            } => Some(error),
            ReconcileError::CreateFailed { source, .. } => source.remote_error(),
            _ => None,
        }
    }

    pub fn context(&self) -> Option<&OperationContext> {
        match self {
            ReconcileError::Remote { context, .. }
            | ReconcileError::ResourceEnteredFailureState { context, .. }
            | ReconcileError::Timeout { context, .. }
            | ReconcileError::Cancelled { context }
            | ReconcileError::ResourceGone { context } => Some(context),
            ReconcileError::CreateFailed { source, .. } => source.context(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

fn on_identity(identity: &Option<String>) -> String {
    identity
        .as_ref()
        .map(|id| format!(" '{}'", id))
        .unwrap_or_default()
}
