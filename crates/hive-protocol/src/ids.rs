//! Identifier types.
//!
//! String ids are opaque wrappers (serde-transparent) so blobs stay compact.
//! Process ids are kernel-assigned counters rendered as `P<n>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Stable id of an object in the world snapshot (creep, structure, source).
    ObjectId
);
typed_id!(
    /// Name of a colony. Tasks are always scoped to exactly one colony.
    ColonyName
);
typed_id!(
    /// Deterministic identity of a task node, unique among its siblings.
    TaskIdentifier
);

impl TaskIdentifier {
    /// Identifier for a task of `type_tag` inside `colony`.
    pub fn derive(type_tag: &str, colony: &ColonyName) -> Self {
        Self(format!("{type_tag}@{colony}"))
    }

    /// Identifier for a task that targets one specific object, e.g. a
    /// harvest task per source.
    pub fn derive_for(type_tag: &str, colony: &ColonyName, qualifier: &str) -> Self {
        Self(format!("{type_tag}@{colony}#{qualifier}"))
    }
}

/// Kernel-assigned process id. Never chosen by a process itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u64);

impl ProcessId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// `None` once the id space is used up.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix(['P', 'p']).unwrap_or(s);
        digits.parse().map(Self)
    }
}
