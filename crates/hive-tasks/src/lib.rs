//! # hive-tasks: colony-scoped task trees
//!
//! A task tree is the unit of work inside one colony. Every tick the tree
//! runs depth-first: children first, in their stored order, then the
//! parent's own logic with the merged requests of its children. Finished
//! and failed children are pruned on the way up. Each child runs behind a
//! fault barrier, so a panicking or erroring node costs one tick of its
//! own subtree and nothing else.
//!
//! Task kinds are a closed enum owned by the caller, implementing
//! [`TaskLogic`]. A [`hive_registry::TypeRegistry`] rebuilds them from the
//! checkpoint blob.
//!
//! ## Module Overview
//!
//! - [`node`]: TaskNode, TaskLogic, TaskStatus
//! - [`context`]: TaskContext, TaskScope
//! - [`runner`]: run_task, run_root
//! - [`codec`]: encode / decode against the checkpoint blob

pub mod codec;
pub mod context;
pub mod node;
pub mod runner;

#[cfg(test)]
pub(crate) mod testkit;

pub use codec::DroppedChild;
pub use context::{TaskContext, TaskScope};
pub use node::{TaskLogic, TaskNode, TaskStatus};
pub use runner::{run_root, run_task};
