//! Resource kind descriptors
//!
//! A [`ResourceKind`] tells the reconciler how one resource type maps onto
//! the remote API: operation names, identity layout, whether it has an
//! asynchronous status, whether it is taggable, and which error codes count
//! as success for which verb.

use crate::config::TimeoutConfig;
use crate::error::{ReconcileError, Result};
use crate::identity::ResourceIdentity;
use crate::poller::{NotFoundPolicy, PollTarget};
use crate::service::ResourceRef;
use crate::value::{FieldMap, FieldMapExt, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Lifecycle verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Create => write!(f, "create"),
            Verb::Read => write!(f, "read"),
            Verb::Update => write!(f, "update"),
            Verb::Delete => write!(f, "delete"),
        }
    }
}

/// Remote operation names for a kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operations {
    pub create: String,
    pub describe: String,
    /// Kinds without an update call treat every field as immutable
    pub update: Option<String>,
    pub delete: String,
}

impl Operations {
    pub fn new(
        create: impl Into<String>,
        describe: impl Into<String>,
        delete: impl Into<String>,
    ) -> Self {
        Self {
            create: create.into(),
            describe: describe.into(),
            update: None,
            delete: delete.into(),
        }
    }

    pub fn with_update(mut self, update: impl Into<String>) -> Self {
        self.update = Some(update.into());
        self
    }
}

/// Asynchronous status handling; present only for kinds whose mutations
/// complete in the background
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    pub create: PollTarget,
    pub update: Option<PollTarget>,
    pub delete: PollTarget,
}

impl StatusConfig {
    /// Wait for `ready` after create and update, and for deletion after
    /// delete. A resource not yet visible after create is still pending.
    pub fn ready_in<I, S>(ready: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let target = PollTarget::new(ready);
        Self {
            create: target.clone().when_not_found(NotFoundPolicy::Pending),
            update: Some(target),
            delete: PollTarget::deleted(),
        }
    }

    pub fn with_failure<I, S>(mut self, failure: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let failure: Vec<String> = failure.into_iter().map(Into::into).collect();
        self.create = self.create.with_failure(failure.clone());
        self.update = self.update.map(|t| t.with_failure(failure.clone()));
        self.delete = self.delete.with_failure(failure);
        self
    }

    pub fn target(&self, verb: Verb) -> Option<&PollTarget> {
        match verb {
            Verb::Create => Some(&self.create),
            Verb::Update => self.update.as_ref(),
            Verb::Delete => Some(&self.delete),
            Verb::Read => None,
        }
    }
}

/// Tagging support
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Resource type understood by the tagging API
    pub resource_type: String,

    /// Which identity segment is the tagged resource's id
    pub id_segment: usize,

    /// Operation listing tags; when absent tags are read from the describe
    /// response's `tags` field
    pub list_operation: Option<String>,

    /// Error codes from the tagging API that count as success
    #[serde(default)]
    pub success_codes: BTreeSet<String>,
}

impl TagConfig {
    /// Tagged resource addressed by the last identity segment
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id_segment: usize::MAX,
            list_operation: None,
            success_codes: BTreeSet::new(),
        }
    }

    pub fn at_segment(mut self, index: usize) -> Self {
        self.id_segment = index;
        self
    }

    pub fn listed_by(mut self, operation: impl Into<String>) -> Self {
        self.list_operation = Some(operation.into());
        self
    }

    pub fn treat_as_success(mut self, code: impl Into<String>) -> Self {
        self.success_codes.insert(code.into());
        self
    }

    pub fn resource_ref(&self, identity: &ResourceIdentity) -> ResourceRef {
        let segments = identity.segments();
        let index = self.id_segment.min(segments.len().saturating_sub(1));
        ResourceRef::new(&self.resource_type, &segments[index])
    }
}

/// Descriptor of one managed resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKind {
    /// Resource type tag (e.g. "api_gateway_group")
    pub name: String,

    pub operations: Operations,

    /// Field names of the identity segments, in order. Create fills each
    /// from its response first and the spec second.
    pub identity_fields: Vec<String>,

    pub status: Option<StatusConfig>,

    pub tags: Option<TagConfig>,

    /// Per-verb error codes that resolve a call as success
    #[serde(default)]
    pub success_codes: BTreeMap<Verb, BTreeSet<String>>,

    /// Overrides the reconciler's default deadlines
    pub timeouts: Option<TimeoutConfig>,
}

impl ResourceKind {
    pub fn new<I, S>(name: impl Into<String>, operations: Operations, identity_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            operations,
            identity_fields: identity_fields.into_iter().map(Into::into).collect(),
            status: None,
            tags: None,
            success_codes: BTreeMap::new(),
            timeouts: None,
        }
    }

    pub fn with_status(mut self, status: StatusConfig) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tags(mut self, tags: TagConfig) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn treat_as_success(mut self, verb: Verb, code: impl Into<String>) -> Self {
        self.success_codes
            .entry(verb)
            .or_default()
            .insert(code.into());
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn success_codes(&self, verb: Verb) -> Option<&BTreeSet<String>> {
        self.success_codes.get(&verb)
    }

    pub fn segment_count(&self) -> usize {
        self.identity_fields.len()
    }

    /// Decode a stored identity string with this kind's segment count
    pub fn decode_identity(&self, id: &str) -> Result<ResourceIdentity> {
        ResourceIdentity::decode(id, self.segment_count())
    }

    /// Request fields addressing an existing resource
    pub fn identity_request(&self, identity: &ResourceIdentity) -> Result<FieldMap> {
        if identity.len() != self.segment_count() {
            return Err(ReconcileError::MalformedIdentity {
                id: identity.encode(),
                expected: self.segment_count(),
                found: identity.len(),
            });
        }
        Ok(self
            .identity_fields
            .iter()
            .zip(identity.segments())
            .map(|(field, segment)| (field.clone(), FieldValue::String(segment.clone())))
            .collect())
    }

    /// Build the identity of a freshly created resource
    pub fn identity_from(&self, response: &FieldMap, spec_fields: &FieldMap) -> Result<ResourceIdentity> {
        let parts = self
            .identity_fields
            .iter()
            .map(|field| {
                let value = match response.get(field) {
                    Some(value) => value,
                    None => spec_fields.require(field, &self.operations.create)?,
                };
                value.as_segment(field)
            })
            .collect::<Result<Vec<_>>>()?;
        ResourceIdentity::new(parts)
    }
}

/// Read-only lookup of remote objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    pub list_operation: String,
    /// Response field holding the list of results
    #[serde(default = "default_items_field")]
    pub items_field: String,
    /// Not-found answers are errors rather than an empty result
    #[serde(default)]
    pub required: bool,
}

fn default_items_field() -> String {
    "items".to_string()
}

impl DataSource {
    pub fn new(name: impl Into<String>, list_operation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            list_operation: list_operation.into(),
            items_field: default_items_field(),
            required: false,
        }
    }

    pub fn with_items_field(mut self, field: impl Into<String>) -> Self {
        self.items_field = field.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Kinds and data sources known to a provider, indexed by name
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    resources: HashMap<String, ResourceKind>,
    data_sources: HashMap<String, DataSource>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ResourceKind) {
        self.resources.insert(kind.name.clone(), kind);
    }

    pub fn add_data_source(&mut self, source: DataSource) {
        self.data_sources.insert(source.name.clone(), source);
    }

    pub fn resource(&self, name: &str) -> Result<&ResourceKind> {
        self.resources
            .get(name)
            .ok_or_else(|| ReconcileError::UnknownKind(name.to_string()))
    }

    pub fn data_source(&self, name: &str) -> Result<&DataSource> {
        self.data_sources
            .get(name)
            .ok_or_else(|| ReconcileError::UnknownKind(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceKind> {
        self.resources.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
