//! The four-verb reconciliation lifecycle
//!
//! [`ResourceReconciler`] drives one resource through create, read, update
//! and delete against a [`RemoteService`], composing the retrying invoker,
//! the status poller and the tag reconciler.

use crate::classify::{CodeClassifier, ErrorClassifier};
use crate::config::ReconcilerConfig;
use crate::error::{OperationContext, ReconcileError, Result};
use crate::identity::ResourceIdentity;
use crate::kind::{DataSource, ResourceKind, Verb};
use crate::poller::{PollOutcome, StatePoller};
use crate::retry::{Call, Invoked, RetryingInvoker};
use crate::service::RemoteService;
use crate::spec::{
    DeleteOutcome, Observed, ReadOutcome, Reconciled, ResourceSpec, TAGS_FIELD, Warning,
    display_or_unset,
};
use crate::tags::{APPLY_TAGS, TagReconciler, TagSet};
use crate::value::{FieldMap, FieldValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs create/read/update/delete for any [`ResourceKind`]
pub struct ResourceReconciler {
    service: Arc<dyn RemoteService>,
    classifier: Arc<dyn ErrorClassifier>,
    config: ReconcilerConfig,
    cancel: CancellationToken,
    invoker: RetryingInvoker,
    poller: StatePoller,
}

impl ResourceReconciler {
    pub fn new(service: Arc<dyn RemoteService>, config: ReconcilerConfig) -> Self {
        let cancel = CancellationToken::new();
        Self {
            service,
            classifier: Arc::new(CodeClassifier::default()),
            invoker: RetryingInvoker::new(config.retry.clone(), cancel.clone()),
            poller: StatePoller::new(config.poll_interval(), cancel.clone()),
            config,
            cancel,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Tie every sleep of this reconciler to an external token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.invoker = RetryingInvoker::new(self.config.retry.clone(), cancel.clone());
        self.poller = StatePoller::new(self.config.poll_interval(), cancel.clone());
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    fn timeout(&self, kind: &ResourceKind, verb: Verb) -> Duration {
        kind.timeouts
            .as_ref()
            .unwrap_or(&self.config.timeouts)
            .for_verb(verb)
    }

    fn call<'a>(
        &self,
        kind: &'a ResourceKind,
        verb: Verb,
        operation: &'a str,
        identity: Option<&'a str>,
    ) -> Call<'a> {
        let mut call = Call::new(operation, self.timeout(kind, verb));
        if let Some(identity) = identity {
            call = call.on(identity);
        }
        if let Some(codes) = kind.success_codes(verb) {
            call = call.treating_as_success(codes);
        }
        call
    }

    async fn invoke_operation(&self, call: Call<'_>, request: &FieldMap) -> Result<Invoked<FieldMap>> {
        let service = &self.service;
        self.invoker
            .invoke(call, &*self.classifier, || service.invoke(call.operation, request))
            .await
    }

    fn ensure_kind(kind: &ResourceKind, spec: &ResourceSpec) -> Result<()> {
        if spec.kind != kind.name {
            return Err(ReconcileError::KindMismatch {
                expected: kind.name.clone(),
                found: spec.kind.clone(),
            });
        }
        Ok(())
    }

    /// Tags on a kind without tagging support would be silently dropped
    fn ensure_taggable(kind: &ResourceKind, spec: &ResourceSpec) -> Result<()> {
        if spec.has_tags() && kind.tags.is_none() {
            return Err(ReconcileError::InvalidField {
                field: TAGS_FIELD.to_string(),
                expected: "taggable kind",
                found: kind.name.clone(),
            });
        }
        Ok(())
    }

    async fn wait_for_status(
        &self,
        kind: &ResourceKind,
        verb: Verb,
        identity: &ResourceIdentity,
    ) -> Result<Option<PollOutcome>> {
        let Some(target) = kind.status.as_ref().and_then(|s| s.target(verb)) else {
            return Ok(None);
        };

        let id = identity.encode();
        let operation = format!("wait for {} {}", kind.name, verb);
        let service = &self.service;
        let outcome = self
            .poller
            .wait_for(
                &operation,
                Some(&id),
                target,
                self.timeout(kind, verb),
                &*self.classifier,
                || service.fetch_status(&kind.name, identity.segments()),
            )
            .await?;
        Ok(Some(outcome))
    }

    async fn sync_tags(
        &self,
        kind: &ResourceKind,
        verb: Verb,
        identity: &ResourceIdentity,
        observed: &TagSet,
        desired: &TagSet,
    ) -> Result<()> {
        let Some(tag_config) = &kind.tags else {
            return Ok(());
        };
        let resource = tag_config.resource_ref(identity);
        TagReconciler::new(&*self.service, &self.invoker, &*self.classifier)
            .reconcile(
                &resource,
                &identity.encode(),
                observed,
                desired,
                self.timeout(kind, verb),
                &tag_config.success_codes,
            )
            .await?;
        Ok(())
    }

    /// Create the resource described by `spec`
    pub async fn create(&self, kind: &ResourceKind, spec: &ResourceSpec) -> Result<Reconciled> {
        Self::ensure_kind(kind, spec)?;
        Self::ensure_taggable(kind, spec)?;
        let desired_tags = spec.tags()?;
        let failed = |identity: Option<&ResourceIdentity>, source: ReconcileError| {
            ReconcileError::CreateFailed {
                kind: kind.name.clone(),
                identity: identity.map(ResourceIdentity::encode),
                source: Box::new(source),
            }
        };

        let request = spec.request_fields();
        let call = self.call(kind, Verb::Create, &kind.operations.create, None);
        let response = match self.invoke_operation(call, &request).await {
            Ok(Invoked::Done(response)) => response,
            Ok(Invoked::AlreadyDone(code)) => {
                debug!(kind = %kind.name, code = %code, "Create resolved by success code");
                FieldMap::new()
            }
            Err(e) => return Err(failed(None, e)),
        };

        let identity = kind
            .identity_from(&response, &spec.fields)
            .map_err(|e| failed(None, e))?;
        info!(
            service = %self.service.name(),
            kind = %kind.name,
            identity = %identity,
            "Created resource"
        );

        let mut reconciled = Reconciled::new(identity.clone(), spec);

        // From here on the resource exists remotely and the identity must be kept.
        match self.wait_for_status(kind, Verb::Create, &identity).await {
            Ok(Some(PollOutcome::Reached(state))) => reconciled.status = Some(state),
            Ok(_) => {}
            Err(e) => return Err(failed(Some(&identity), e)),
        }

        if let Some(desired) = &desired_tags {
            if let Err(e) = self
                .sync_tags(kind, Verb::Create, &identity, &TagSet::new(), desired)
                .await
            {
                warn!(kind = %kind.name, identity = %identity, error = %e, "Tag sync failed after create");
                reconciled.warnings.push(Warning::from_error(APPLY_TAGS, &e));
            }
        }

        match self.read(kind, &identity).await {
            Ok(ReadOutcome::Found(observed)) => reconciled.observe(observed),
            Ok(ReadOutcome::Gone) => {
                warn!(kind = %kind.name, identity = %identity, "Created resource not visible yet");
                reconciled.warnings.push(Warning {
                    operation: kind.operations.describe.clone(),
                    message: "resource not visible after create".to_string(),
                });
            }
            Err(e) => {
                warn!(kind = %kind.name, identity = %identity, error = %e, "Read after create failed");
                reconciled
                    .warnings
                    .push(Warning::from_error(kind.operations.describe.clone(), &e));
            }
        }

        Ok(reconciled)
    }

    /// Describe the resource; a not-found answer means it is gone
    pub async fn read(&self, kind: &ResourceKind, identity: &ResourceIdentity) -> Result<ReadOutcome> {
        let request = kind.identity_request(identity)?;
        let id = identity.encode();
        let call = self.call(kind, Verb::Read, &kind.operations.describe, Some(&id));

        let mut fields = match self.invoke_operation(call, &request).await {
            Ok(invoked) => invoked.into_option().unwrap_or_default(),
            Err(e) if e.is_not_found() => {
                info!(kind = %kind.name, identity = %id, "Resource no longer exists");
                return Ok(ReadOutcome::Gone);
            }
            Err(e) => return Err(e),
        };

        let embedded_tags = fields.remove(TAGS_FIELD);
        let tags = match &kind.tags {
            None => None,
            Some(tag_config) => match &tag_config.list_operation {
                Some(operation) => {
                    let resource = tag_config.resource_ref(identity);
                    let request: FieldMap = [
                        ("resource_type".to_string(), FieldValue::from(resource.resource_type)),
                        ("resource_id".to_string(), FieldValue::from(resource.resource_id)),
                    ]
                    .into();
                    let call = self.call(kind, Verb::Read, operation, Some(&id));
                    let response = self
                        .invoke_operation(call, &request)
                        .await?
                        .into_option()
                        .unwrap_or_default();
                    Some(tags_from(response.get(TAGS_FIELD))?)
                }
                None => Some(tags_from(embedded_tags.as_ref())?),
            },
        };

        Ok(ReadOutcome::Found(Observed {
            identity: identity.clone(),
            fields,
            tags,
        }))
    }

    /// Move an existing resource from `old` to `new`
    pub async fn update(
        &self,
        kind: &ResourceKind,
        identity: &ResourceIdentity,
        old: &ResourceSpec,
        new: &ResourceSpec,
    ) -> Result<Reconciled> {
        let started = Instant::now();
        let id = identity.encode();
        Self::ensure_kind(kind, new)?;
        Self::ensure_taggable(kind, new)?;
        ResourceSpec::check_immutable(old, new, Some(identity))?;

        let changed = old.changed_fields(new);
        // Unset fields fall back to remote defaults; there is nothing to send for them
        let updates: FieldMap = changed
            .iter()
            .filter_map(|name| new.field(name).map(|value| (name.clone(), value.clone())))
            .collect();
        let mut reconciled = Reconciled::new(identity.clone(), new);

        if let Some((field, value)) = updates.iter().next() {
            let Some(operation) = &kind.operations.update else {
                return Err(ReconcileError::ImmutableFieldChanged {
                    kind: kind.name.clone(),
                    identity: Some(id),
                    field: field.clone(),
                    old: display_or_unset(old.field(field)),
                    new: value.to_string(),
                });
            };

            let mut request = kind.identity_request(identity)?;
            request.extend(updates.clone());

            let call = self.call(kind, Verb::Update, operation, Some(&id));
            self.invoke_operation(call, &request).await?;
            info!(
                service = %self.service.name(),
                kind = %kind.name,
                identity = %id,
                fields = ?updates.keys().collect::<Vec<_>>(),
                "Updated resource"
            );

            if let Some(PollOutcome::Reached(state)) =
                self.wait_for_status(kind, Verb::Update, identity).await?
            {
                reconciled.status = Some(state);
            }
        } else if !changed.is_empty() {
            debug!(
                kind = %kind.name,
                identity = %id,
                fields = ?changed,
                "Only unset fields changed, skipping update call"
            );
        }

        if kind.tags.is_some() && (old.has_tags() || new.has_tags()) {
            let before = old.tags()?.unwrap_or_default();
            let after = new.tags()?.unwrap_or_default();
            if before != after {
                self.sync_tags(kind, Verb::Update, identity, &before, &after)
                    .await?;
            }
        }

        match self.read(kind, identity).await? {
            ReadOutcome::Found(observed) => reconciled.observe(observed),
            ReadOutcome::Gone => {
                return Err(ReconcileError::ResourceGone {
                    context: OperationContext::new(
                        kind.operations.describe.clone(),
                        Some(&id),
                        started.elapsed(),
                    ),
                });
            }
        }

        Ok(reconciled)
    }

    /// Delete the resource; one that is already gone counts as deleted
    pub async fn delete(&self, kind: &ResourceKind, identity: &ResourceIdentity) -> Result<DeleteOutcome> {
        let request = kind.identity_request(identity)?;
        let id = identity.encode();
        let call = self.call(kind, Verb::Delete, &kind.operations.delete, Some(&id));

        match self.invoke_operation(call, &request).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(kind = %kind.name, identity = %id, "Resource already deleted");
                return Ok(DeleteOutcome::AlreadyGone);
            }
            Err(e) => return Err(e),
        }

        self.wait_for_status(kind, Verb::Delete, identity).await?;
        info!(
            service = %self.service.name(),
            kind = %kind.name,
            identity = %id,
            "Deleted resource"
        );
        Ok(DeleteOutcome::Deleted)
    }

    /// Adopt an existing remote resource by its identity string
    pub async fn import(&self, kind: &ResourceKind, id: &str) -> Result<Observed> {
        let started = Instant::now();
        let identity = kind.decode_identity(id)?;
        match self.read(kind, &identity).await? {
            ReadOutcome::Found(observed) => Ok(observed),
            ReadOutcome::Gone => Err(ReconcileError::ResourceGone {
                context: OperationContext::new(
                    kind.operations.describe.clone(),
                    Some(id),
                    started.elapsed(),
                ),
            }),
        }
    }

    /// Data-source read: list remote objects matching `filters`
    pub async fn lookup(&self, source: &DataSource, filters: &FieldMap) -> Result<Vec<FieldMap>> {
        let call = Call::new(&source.list_operation, self.config.timeouts.for_verb(Verb::Read));

        let response = match self.invoke_operation(call, filters).await {
            Ok(invoked) => invoked.into_option().unwrap_or_default(),
            Err(e) if e.is_not_found() && !source.required => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let Some(items) = response.get(&source.items_field) else {
            return Ok(Vec::new());
        };
        let items = items
            .as_list(&source.items_field)?
            .iter()
            .map(|item| item.as_map(&source.items_field).cloned())
            .collect::<Result<Vec<_>>>()?;

        debug!(data_source = %source.name, count = items.len(), "Looked up data source");
        Ok(items)
    }
}

fn tags_from(value: Option<&FieldValue>) -> Result<TagSet> {
    value
        .map(|v| TagSet::from_field(TAGS_FIELD, v))
        .transpose()
        .map(Option::unwrap_or_default)
}
