//! Actions taken by a convergence pass

use serde::{Deserialize, Serialize};

/// What converging one resource did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Created a new resource
    Create,
    /// Updated an existing resource in place
    Update,
    /// Deleted the resource and created it again
    Replace,
    /// Deleted a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl ActionType {
    pub fn has_changes(&self) -> bool {
        *self != ActionType::NoOp
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}
