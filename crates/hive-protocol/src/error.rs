//! Error taxonomy for the scheduler core.
//!
//! Four classes, each with its own type so callers cannot confuse them:
//! programming errors and checkpoint corruption ([`KernelError`]), recoverable
//! decode failures ([`DecodeError`]), recoverable run failures ([`TaskError`],
//! [`ProcessError`]) and launch rejections ([`LaunchRejection`]).

use crate::ids::{ObjectId, ProcessId, TaskIdentifier};
use thiserror::Error;

/// Invariant violations and unrecoverable checkpoint failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("type tag registered twice: {0}")]
    DuplicateTag(String),
    #[error("process id {0} is already live")]
    IdReuse(ProcessId),
    #[error("process {requester} does not own {target}")]
    NotOwned {
        requester: ProcessId,
        target: ProcessId,
    },
    #[error("process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("checkpoint corrupt: {0}")]
    CorruptCheckpoint(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Why a node could not be reconstructed from its blob. The subtree is
/// dropped; siblings are unaffected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unregistered type tag: {0}")]
    UnknownTag(String),
    #[error("{tag} references {object}, which no longer exists")]
    Dangling { tag: String, object: ObjectId },
    #[error("malformed {tag} fields: {reason}")]
    Malformed { tag: String, reason: String },
    #[error("{tag} cannot survive without its child {child}")]
    MissingChild { tag: String, child: String },
}

impl DecodeError {
    pub fn malformed(tag: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            tag: tag.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures raised by a task while it runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("{parent} already owns a child named {child}")]
    DuplicateChild {
        parent: TaskIdentifier,
        child: TaskIdentifier,
    },
    #[error("{parent} has no child named {child}")]
    ChildNotFound {
        parent: TaskIdentifier,
        child: TaskIdentifier,
    },
    #[error("{0}")]
    Logic(String),
}

/// Failures raised by a process while it runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("{0}")]
    Logic(String),
}

/// Typed reasons a launch message was refused. Always returned to the caller
/// of `launch`, never raised past the kernel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LaunchRejection {
    #[error("parent process {0} does not exist")]
    ParentNotFound(ProcessId),
    #[error("parent process {parent} ({type_tag}) cannot launch children")]
    NoLauncherCapability { parent: ProcessId, type_tag: String },
    #[error("{type_tag} is not in the launch table of its parent")]
    NotLaunchable { type_tag: String },
    #[error("unknown process type: {0}")]
    UnknownType(String),
    #[error("invalid arguments for {type_tag}: {reason}")]
    InvalidArguments { type_tag: String, reason: String },
    #[error("no free process id left")]
    IdSpaceExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_display() {
        assert_eq!(
            KernelError::IdReuse(ProcessId::new(4)).to_string(),
            "process id P4 is already live"
        );
        assert_eq!(
            KernelError::NotOwned {
                requester: ProcessId::new(1),
                target: ProcessId::new(2),
            }
            .to_string(),
            "process P1 does not own P2"
        );
    }

    #[test]
    fn decode_error_names_the_dangling_object() {
        let error = DecodeError::Dangling {
            tag: "harvest".into(),
            object: ObjectId::from("src-1"),
        };
        assert_eq!(
            error.to_string(),
            "harvest references src-1, which no longer exists"
        );
    }

    #[test]
    fn launch_rejection_display() {
        let rejection = LaunchRejection::InvalidArguments {
            type_tag: "colony".into(),
            reason: "missing colony".into(),
        };
        assert_eq!(
            rejection.to_string(),
            "invalid arguments for colony: missing colony"
        );
    }
}
