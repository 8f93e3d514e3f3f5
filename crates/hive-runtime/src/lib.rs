//! # hive-runtime: agent-scoped process scheduler
//!
//! Processes form a forest rooted at the kernel. Each tick the
//! [`Scheduler`] rebuilds the forest from the checkpoint, walks it parents
//! first with every run behind a fault barrier, applies the lifecycle
//! messages processes queued, and encodes the forest back.
//!
//! Process kinds are a closed enum owned by the caller implementing
//! [`ProcessLogic`]. A kind that hosts children also implements
//! [`Launcher`] and exposes it through [`ProcessLogic::launcher`].
//!
//! ## Module Overview
//!
//! - [`process`]: ProcessLogic, Launcher, ProcessEntry
//! - [`context`]: ProcessContext, UnloadContext, ChildInfo
//! - [`scheduler`]: Scheduler, RunReport, KillReport, ProcessInfo
//! - [`hook`]: SchedulerHook, NoopHook, RunLimit

pub mod context;
pub mod hook;
pub mod process;
pub mod scheduler;

pub use context::{ChildInfo, ProcessContext, UnloadContext};
pub use hook::{NoopHook, RunLimit, SchedulerHook};
pub use process::{Launcher, ProcessEntry, ProcessLogic};
pub use scheduler::{KillReport, ProcessInfo, RunReport, Scheduler};
