//! Desired and reconciled resource state

use crate::error::{ReconcileError, Result};
use crate::identity::ResourceIdentity;
use crate::tags::TagSet;
use crate::value::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name of the field carrying a resource's tags
pub const TAGS_FIELD: &str = "tags";

/// Desired state for one resource instance
///
/// `fields` holds only what the caller actually set; unset fields are left
/// to the remote defaults and come back as computed fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: String,

    #[serde(default)]
    pub fields: FieldMap,

    /// Fields that cannot change after creation
    #[serde(default)]
    pub immutable_fields: BTreeSet<String>,
}

impl ResourceSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: FieldMap::new(),
            immutable_fields: BTreeSet::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_immutable(mut self, name: impl Into<String>) -> Self {
        self.immutable_fields.insert(name.into());
        self
    }

    pub fn with_tags(self, tags: &TagSet) -> Self {
        self.with_field(TAGS_FIELD, tags.to_field())
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn has_tags(&self) -> bool {
        self.fields.contains_key(TAGS_FIELD)
    }

    /// Desired tags, if the spec sets a `tags` field
    pub fn tags(&self) -> Result<Option<TagSet>> {
        self.fields
            .get(TAGS_FIELD)
            .map(|value| TagSet::from_field(TAGS_FIELD, value))
            .transpose()
    }

    /// Fields sent to the remote create call; tags go through the tagging
    /// API instead
    pub fn request_fields(&self) -> FieldMap {
        self.fields
            .iter()
            .filter(|(name, _)| name.as_str() != TAGS_FIELD)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Names of non-tag fields whose value differs between `self` and
    /// `other`, including fields set on only one side
    pub fn changed_fields(&self, other: &ResourceSpec) -> Vec<String> {
        let names: BTreeSet<&String> = self.fields.keys().chain(other.fields.keys()).collect();
        names
            .into_iter()
            .filter(|name| name.as_str() != TAGS_FIELD)
            .filter(|name| self.fields.get(*name) != other.fields.get(*name))
            .cloned()
            .collect()
    }

    /// Fail if `new` changes a field it declares immutable
    pub fn check_immutable(
        old: &ResourceSpec,
        new: &ResourceSpec,
        identity: Option<&ResourceIdentity>,
    ) -> Result<()> {
        for field in &new.immutable_fields {
            let before = old.fields.get(field);
            let after = new.fields.get(field);
            if before != after {
                return Err(ReconcileError::ImmutableFieldChanged {
                    kind: new.kind.clone(),
                    identity: identity.map(ResourceIdentity::encode),
                    field: field.clone(),
                    old: display_or_unset(before),
                    new: display_or_unset(after),
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn display_or_unset(value: Option<&FieldValue>) -> String {
    value.map_or_else(|| "<unset>".to_string(), |v| v.to_string())
}

/// A resource as the remote side reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observed {
    pub identity: ResourceIdentity,

    /// Describe response, minus tags
    pub fields: FieldMap,

    /// Observed tags, for taggable kinds
    pub tags: Option<TagSet>,
}

/// Outcome of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Found(Observed),
    /// The resource no longer exists; the caller must clear its identity
    Gone,
}

/// Outcome of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete
    AlreadyGone,
}

/// Non-fatal problem encountered after the resource already existed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub operation: String,
    pub message: String,
}

impl Warning {
    pub fn from_error(operation: impl Into<String>, error: &ReconcileError) -> Self {
        Self {
            operation: operation.into(),
            message: error.to_string(),
        }
    }
}

/// Result of a successful create or update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciled {
    pub identity: ResourceIdentity,

    /// The desired spec that was applied
    pub spec: ResourceSpec,

    /// Fields as reported by the remote describe call
    pub computed: FieldMap,

    pub tags: Option<TagSet>,

    /// Last status reached while waiting, for kinds with a status
    pub status: Option<String>,

    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl Reconciled {
    pub(crate) fn new(identity: ResourceIdentity, spec: &ResourceSpec) -> Self {
        Self {
            identity,
            spec: spec.clone(),
            computed: FieldMap::new(),
            tags: None,
            status: None,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn observe(&mut self, observed: Observed) {
        self.computed = observed.fields;
        self.tags = observed.tags;
    }

    /// Look up a field, preferring the remote view over the desired one
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.computed.get(name).or_else(|| self.spec.field(name))
    }

    pub fn id(&self) -> String {
        self.identity.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(gateway_id: &str) -> ResourceSpec {
        ResourceSpec::new("api_gateway_group")
            .with_field("gateway_id", gateway_id)
            .with_field("name", "g1")
            .with_immutable("gateway_id")
    }

    #[test]
    fn test_immutable_guard() {
        let err = ResourceSpec::check_immutable(&gateway("A"), &gateway("B"), None).unwrap_err();
        match err {
            ReconcileError::ImmutableFieldChanged { field, old, new, .. } => {
                assert_eq!(field, "gateway_id");
                assert_eq!(old, "A");
                assert_eq!(new, "B");
            }
            other => panic!("expected ImmutableFieldChanged, got {:?}", other),
        }

        assert!(ResourceSpec::check_immutable(&gateway("A"), &gateway("A"), None).is_ok());
    }

    #[test]
    fn test_changed_fields_ignores_tags() {
        let mut tags = TagSet::new();
        tags.insert("env", "prod");

        let old = gateway("A").with_field("description", "old");
        let new = gateway("A").with_field("number", 2).with_tags(&tags);

        assert_eq!(old.changed_fields(&new), vec!["description", "number"]);
    }

    #[test]
    fn test_request_fields_exclude_tags() {
        let mut tags = TagSet::new();
        tags.insert("env", "prod");
        let spec = gateway("A").with_tags(&tags);

        assert!(spec.has_tags());
        assert!(!spec.request_fields().contains_key(TAGS_FIELD));
        assert_eq!(spec.tags().unwrap(), Some(tags));
    }
}
