//! Remote service capability

use crate::error::RemoteError;
use crate::tags::TagSet;
use crate::value::FieldMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote control plane abstraction
///
/// Implementations own the wire protocol, authentication and region
/// routing. The reconciler constructs nothing global: one service handle is
/// created by the caller and passed into every reconciler.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Returns the service name used in logs (e.g. "apigateway")
    fn name(&self) -> &str;

    /// Invoke a named remote operation
    async fn invoke(&self, operation: &str, request: &FieldMap) -> Result<FieldMap, RemoteError>;

    /// Fetch the current status of a resource addressed by its identity
    /// segments
    async fn fetch_status(&self, kind: &str, segments: &[String]) -> Result<String, RemoteError>;

    /// Replace and delete tags on a resource in one call
    async fn apply_tags(
        &self,
        resource: &ResourceRef,
        to_replace: &TagSet,
        to_delete: &[String],
    ) -> Result<(), RemoteError>;
}

/// Address of a taggable resource in the tagging API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Tagging API resource type (e.g. "apigroup")
    pub resource_type: String,

    /// Remote id of the resource
    pub resource_id: String,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}
