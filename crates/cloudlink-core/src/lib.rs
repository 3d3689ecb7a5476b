//! Cloudlink Resource Reconciliation
//!
//! This crate provides the shared core of cloudlink provider plugins:
//! driving remote resources through create, read, update and delete with
//! retries, status polling, tag synchronization and composite identities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Provider plugin host                │
//! │          (plan / apply / import / read)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                cloudlink-core                    │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │           ResourceReconciler              │   │
//! │  │  create / read / update / delete          │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐ ┌─────────────┐ ┌──────────┐  │
//! │  │ RetryingInv. │ │ StatePoller │ │ TagRecon │  │
//! │  └──────────────┘ └─────────────┘ └──────────┘  │
//! │  ┌──────────────┐ ┌─────────────┐               │
//! │  │  Identity    │ │ State Mgmt  │               │
//! │  └──────────────┘ └─────────────┘               │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────────────────┐
//! │  trait RemoteService      │
//! │  (vendor API client)      │
//! └───────────────────────────┘
//! ```

pub mod action;
pub mod classify;
pub mod config;
pub mod error;
pub mod identity;
pub mod kind;
pub mod poller;
pub mod reconciler;
pub mod retry;
pub mod service;
pub mod source;
pub mod spec;
pub mod state;
pub mod tags;
pub mod value;

// Re-exports
pub use action::ActionType;
pub use classify::{CodeClassifier, ErrorClassifier};
pub use config::{ReconcilerConfig, TimeoutConfig};
pub use error::{ErrorClass, LastObserved, OperationContext, ReconcileError, RemoteError, Result};
pub use identity::ResourceIdentity;
pub use kind::{
    DataSource, KindRegistry, Operations, ResourceKind, StatusConfig, TagConfig, Verb,
};
pub use poller::{NotFoundPolicy, PollOutcome, PollTarget, StatePoller};
pub use reconciler::ResourceReconciler;
pub use retry::{Call, Invoked, RetryPolicy, RetryingInvoker};
pub use service::{RemoteService, ResourceRef};
pub use source::{MemorySource, SpecSource};
pub use spec::{DeleteOutcome, Observed, ReadOutcome, Reconciled, ResourceSpec, Warning};
pub use state::{GlobalState, ResourceRecord, StateLock, StateManager, StateSource};
pub use tags::{TagDiff, TagReconciler, TagSet};
pub use value::{FieldMap, FieldMapExt, FieldValue};
