//! Converging a resource address against its persisted record
//!
//! A [`SpecSource`] supplies the desired spec for one address and stores
//! what was last applied. [`ResourceReconciler::converge`] compares the two
//! and picks the lifecycle verb.

use crate::action::ActionType;
use crate::error::{ReconcileError, Result};
use crate::kind::{KindRegistry, ResourceKind};
use crate::reconciler::ResourceReconciler;
use crate::spec::{ReadOutcome, ResourceSpec};
use crate::state::ResourceRecord;
use async_trait::async_trait;
use tracing::{info, warn};

/// Desired spec plus persisted record for one resource address
#[async_trait]
pub trait SpecSource: Send + Sync {
    /// Address of the resource, e.g. `api_gateway_group.main`
    fn address(&self) -> &str;

    /// Desired spec; `None` means the resource should not exist
    async fn desired(&self) -> Result<Option<ResourceSpec>>;

    /// Record from the last successful pass
    async fn stored(&self) -> Result<Option<ResourceRecord>>;

    async fn record(&mut self, record: ResourceRecord) -> Result<()>;

    async fn forget(&mut self) -> Result<()>;
}

/// [`SpecSource`] kept in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub address: String,
    pub desired: Option<ResourceSpec>,
    pub stored: Option<ResourceRecord>,
}

impl MemorySource {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn desiring(mut self, spec: ResourceSpec) -> Self {
        self.desired = Some(spec);
        self
    }
}

#[async_trait]
impl SpecSource for MemorySource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn desired(&self) -> Result<Option<ResourceSpec>> {
        Ok(self.desired.clone())
    }

    async fn stored(&self) -> Result<Option<ResourceRecord>> {
        Ok(self.stored.clone())
    }

    async fn record(&mut self, record: ResourceRecord) -> Result<()> {
        self.stored = Some(record);
        Ok(())
    }

    async fn forget(&mut self) -> Result<()> {
        self.stored = None;
        Ok(())
    }
}

impl ResourceReconciler {
    /// Bring one address to its desired spec
    pub async fn converge(
        &self,
        registry: &KindRegistry,
        source: &mut dyn SpecSource,
    ) -> Result<ActionType> {
        let address = source.address().to_string();
        let desired = source.desired().await?;
        let stored = source.stored().await?;

        let action = match (stored, desired) {
            (None, None) => ActionType::NoOp,
            (None, Some(spec)) => {
                let kind = registry.resource(&spec.kind)?;
                self.create_recorded(kind, &spec, source).await?;
                ActionType::Create
            }
            (Some(record), None) => {
                let kind = registry.resource(&record.kind)?;
                let identity = kind.decode_identity(&record.identity)?;
                self.delete(kind, &identity).await?;
                source.forget().await?;
                ActionType::Delete
            }
            (Some(record), Some(spec)) => {
                let kind = registry.resource(&spec.kind)?;
                if record.tainted || record.kind != spec.kind {
                    let old_kind = registry.resource(&record.kind)?;
                    let identity = old_kind.decode_identity(&record.identity)?;
                    self.delete(old_kind, &identity).await?;
                    source.forget().await?;
                    self.create_recorded(kind, &spec, source).await?;
                    ActionType::Replace
                } else {
                    self.converge_existing(kind, record, &spec, source).await?
                }
            }
        };

        info!(address = %address, action = %action, "Converged resource");
        Ok(action)
    }

    async fn converge_existing(
        &self,
        kind: &ResourceKind,
        mut record: ResourceRecord,
        spec: &ResourceSpec,
        source: &mut dyn SpecSource,
    ) -> Result<ActionType> {
        let identity = kind.decode_identity(&record.identity)?;

        let observed = match self.read(kind, &identity).await? {
            ReadOutcome::Found(observed) => observed,
            ReadOutcome::Gone => {
                warn!(address = %source.address(), identity = %identity, "Resource vanished, recreating");
                source.forget().await?;
                self.create_recorded(kind, spec, source).await?;
                return Ok(ActionType::Create);
            }
        };

        // Tags changed out of band count as a difference
        let mut applied = record.spec.clone();
        if spec.has_tags() {
            if let Some(tags) = &observed.tags {
                applied = applied.with_tags(tags);
            }
        }

        if applied == *spec {
            record.refresh(observed);
            source.record(record).await?;
            return Ok(ActionType::NoOp);
        }

        let reconciled = self.update(kind, &identity, &applied, spec).await?;
        let updated = ResourceRecord::from_reconciled(&reconciled).created(record.created_at);
        source.record(updated).await?;
        Ok(ActionType::Update)
    }

    async fn create_recorded(
        &self,
        kind: &ResourceKind,
        spec: &ResourceSpec,
        source: &mut dyn SpecSource,
    ) -> Result<()> {
        match self.create(kind, spec).await {
            Ok(reconciled) => {
                source
                    .record(ResourceRecord::from_reconciled(&reconciled))
                    .await
            }
            Err(e) => {
                if let ReconcileError::CreateFailed {
                    identity: Some(id), ..
                } = &e
                {
                    warn!(address = %source.address(), identity = %id, "Keeping tainted record");
                    source.record(ResourceRecord::tainted(id.clone(), spec)).await?;
                }
                Err(e)
            }
        }
    }
}
