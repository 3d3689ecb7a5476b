//! Composite resource identities
//!
//! A created resource is addressed by an ordered tuple of remote ids
//! (e.g. gateway id + group id + network id). The tuple is stored as one
//! string, `gw-1:grp-2:net-3`, and split back whenever the resource is read,
//! updated or deleted.

use crate::error::{ReconcileError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between identity segments in the stored form
pub const SEPARATOR: char = ':';

/// Durable handle for a created resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentity {
    segments: Vec<String>,
}

impl ResourceIdentity {
    /// Build an identity from its parts, rejecting parts that would not
    /// survive a round trip through the stored form.
    pub fn new<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = parts.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(ReconcileError::InvalidIdentityPart {
                part: String::new(),
                reason: "identity needs at least one part",
            });
        }
        for part in &segments {
            validate_part(part)?;
        }
        Ok(Self { segments })
    }

    /// Split a stored identity, checking the segment count of the kind
    ///
    /// Empty segments do not count, so a corrupted `gw-1::net-3` is reported
    /// as two segments found.
    pub fn decode(id: &str, expected_count: usize) -> Result<Self> {
        let segments: Vec<String> = id.split(SEPARATOR).map(str::to_string).collect();
        let found = segments.iter().filter(|s| !s.is_empty()).count();
        if segments.len() != expected_count || found != expected_count {
            return Err(ReconcileError::MalformedIdentity {
                id: id.to_string(),
                expected: expected_count,
                found,
            });
        }
        Ok(Self { segments })
    }

    pub fn encode(&self) -> String {
        self.segments.join(&SEPARATOR.to_string())
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

fn validate_part(part: &str) -> Result<()> {
    if part.is_empty() {
        return Err(ReconcileError::InvalidIdentityPart {
            part: part.to_string(),
            reason: "part is empty",
        });
    }
    if part.contains(SEPARATOR) {
        return Err(ReconcileError::InvalidIdentityPart {
            part: part.to_string(),
            reason: "part contains the ':' separator",
        });
    }
    Ok(())
}

/// Encode parts into the stored identity string
pub fn encode<S: AsRef<str>>(parts: &[S]) -> Result<String> {
    ResourceIdentity::new(parts.iter().map(|p| p.as_ref().to_string())).map(|id| id.encode())
}

/// Decode a stored identity string into its parts
pub fn decode(id: &str, expected_count: usize) -> Result<Vec<String>> {
    ResourceIdentity::decode(id, expected_count).map(|id| id.segments)
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl TryFrom<String> for ResourceIdentity {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self> {
        let count = value.split(SEPARATOR).count();
        Self::decode(&value, count)
    }
}

impl From<ResourceIdentity> for String {
    fn from(value: ResourceIdentity) -> Self {
        value.encode()
    }
}
