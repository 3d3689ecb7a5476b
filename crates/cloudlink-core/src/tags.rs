//! Tag reconciliation
//!
//! Tags are key/value labels managed through a tagging API separate from
//! the resource's own update call. [`diff`] computes the minimal change set
//! and [`TagReconciler`] applies it.

use crate::classify::ErrorClassifier;
use crate::error::Result;
use crate::retry::{Call, RetryingInvoker};
use crate::service::{RemoteService, ResourceRef};
use crate::value::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

/// Operation name used in errors and logs for tag calls
pub const APPLY_TAGS: &str = "ApplyTags";

/// Tag key to value mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Read a tag set from a map field whose values are strings
    pub fn from_field(field: &str, value: &FieldValue) -> Result<Self> {
        value
            .as_map(field)?
            .iter()
            .map(|(k, v)| {
                v.as_str(&format!("{}.{}", field, k))
                    .map(|v| (k.clone(), v.to_string()))
            })
            .collect()
    }

    pub fn to_field(&self) -> FieldValue {
        FieldValue::Map(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::String(v.clone())))
                .collect::<FieldMap>(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Minimal change moving one tag set to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Keys to add or overwrite, with their desired values
    pub to_replace: TagSet,
    /// Keys to remove, sorted
    pub to_delete: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.to_replace.is_empty() && self.to_delete.is_empty()
    }

    /// The tag set that results from applying this diff to `observed`
    pub fn apply_to(&self, observed: &TagSet) -> TagSet {
        let mut result = observed.clone();
        for key in &self.to_delete {
            result.remove(key);
        }
        for (key, value) in self.to_replace.iter() {
            result.insert(key.clone(), value.clone());
        }
        result
    }
}

/// Compute the minimal diff from `observed` to `desired`
pub fn diff(observed: &TagSet, desired: &TagSet) -> TagDiff {
    let to_replace = desired
        .iter()
        .filter(|(key, value)| observed.get(key) != Some(value.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let to_delete = observed
        .iter()
        .filter(|(key, _)| !desired.contains_key(key))
        .map(|(key, _)| key.clone())
        .collect();

    TagDiff {
        to_replace,
        to_delete,
    }
}

/// Applies tag diffs through the tagging API
pub struct TagReconciler<'a> {
    service: &'a dyn RemoteService,
    invoker: &'a RetryingInvoker,
    classifier: &'a dyn ErrorClassifier,
}

impl<'a> TagReconciler<'a> {
    pub fn new(
        service: &'a dyn RemoteService,
        invoker: &'a RetryingInvoker,
        classifier: &'a dyn ErrorClassifier,
    ) -> Self {
        Self {
            service,
            invoker,
            classifier,
        }
    }

    /// Move the resource's tags from `observed` to `desired`. Returns the
    /// diff that was applied; an empty diff makes no remote call.
    pub async fn reconcile(
        &self,
        resource: &ResourceRef,
        identity: &str,
        observed: &TagSet,
        desired: &TagSet,
        timeout: Duration,
        success_codes: &BTreeSet<String>,
    ) -> Result<TagDiff> {
        let diff = diff(observed, desired);
        self.apply(resource, identity, &diff, timeout, success_codes)
            .await?;
        Ok(diff)
    }

    pub async fn apply(
        &self,
        resource: &ResourceRef,
        identity: &str,
        diff: &TagDiff,
        timeout: Duration,
        success_codes: &BTreeSet<String>,
    ) -> Result<()> {
        if diff.is_empty() {
            debug!(resource = %resource, "Tags already converged");
            return Ok(());
        }

        let call = Call::new(APPLY_TAGS, timeout)
            .on(identity)
            .treating_as_success(success_codes);

        self.invoker
            .invoke(call, self.classifier, || {
                self.service
                    .apply_tags(resource, &diff.to_replace, &diff.to_delete)
            })
            .await?;

        info!(
            resource = %resource,
            replaced = diff.to_replace.len(),
            deleted = diff.to_delete.len(),
            "Applied tag changes"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_diff_add_replace_delete() {
        let observed = tags(&[("env", "dev"), ("team", "core"), ("owner", "mito")]);
        let desired = tags(&[("env", "prod"), ("team", "core"), ("cost", "a1")]);

        let diff = diff(&observed, &desired);

        assert_eq!(diff.to_replace, tags(&[("env", "prod"), ("cost", "a1")]));
        assert_eq!(diff.to_delete, vec!["owner".to_string()]);
        assert_eq!(diff.apply_to(&observed), desired);
    }

    #[test]
    fn test_diff_is_minimal() {
        let observed = tags(&[("a", "1"), ("b", "2")]);
        let desired = tags(&[("a", "1"), ("b", "3")]);

        let diff = diff(&observed, &desired);

        assert!(!diff.to_replace.contains_key("a"));
        assert!(!diff.to_delete.contains(&"a".to_string()));
        assert_eq!(diff.to_replace.get("b"), Some("3"));
    }

    #[test]
    fn test_converged_sets_produce_empty_diff() {
        let set = tags(&[("a", "1")]);
        assert!(diff(&set, &set).is_empty());
        assert!(diff(&TagSet::new(), &TagSet::new()).is_empty());
    }

    #[test]
    fn test_diff_correct_over_combinations() {
        let keys = ["a", "b", "c"];
        let values = [None, Some("1"), Some("2")];

        let mut sets = Vec::new();
        for va in values {
            for vb in values {
                for vc in values {
                    let set: TagSet = keys
                        .iter()
                        .zip([va, vb, vc])
                        .filter_map(|(k, v)| v.map(|v| (*k, v)))
                        .collect();
                    sets.push(set);
                }
            }
        }

        for observed in &sets {
            for desired in &sets {
                let d = diff(observed, desired);
                assert_eq!(&d.apply_to(observed), desired);
                for (key, value) in observed.iter() {
                    if desired.get(key) == Some(value.as_str()) {
                        assert!(!d.to_replace.contains_key(key));
                        assert!(!d.to_delete.contains(key));
                    }
                }
            }
        }
    }

    #[test]
    fn test_field_conversion() {
        let set = tags(&[("env", "prod")]);
        let field = set.to_field();
        assert_eq!(TagSet::from_field("tags", &field).unwrap(), set);

        let bad = FieldValue::Map([("env".to_string(), FieldValue::Int(1))].into());
        assert!(TagSet::from_field("tags", &bad).is_err());
    }
}
