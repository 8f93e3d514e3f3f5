//! Launch messages for parent-mediated process creation.

use crate::ids::ProcessId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where a new process should be attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    /// The kernel root; consults the root launch table.
    Root,
    /// A live process that must expose the launcher capability.
    Process(ProcessId),
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Process(id) => write!(f, "{id}"),
        }
    }
}

impl From<ProcessId> for ParentRef {
    fn from(id: ProcessId) -> Self {
        Self::Process(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchMessage {
    pub target_parent: ParentRef,
    pub type_tag: String,
    #[serde(default)]
    pub arguments: Value,
}

impl LaunchMessage {
    pub fn new(target_parent: impl Into<ParentRef>, type_tag: impl Into<String>, arguments: Value) -> Self {
        Self {
            target_parent: target_parent.into(),
            type_tag: type_tag.into(),
            arguments,
        }
    }

    pub fn at_root(type_tag: impl Into<String>, arguments: Value) -> Self {
        Self::new(ParentRef::Root, type_tag, arguments)
    }
}
