//! # hive-protocol: shared contract types
//!
//! Everything that crosses a crate boundary in the scheduler core lives here:
//! identifiers, the error taxonomy, the request batches nodes produce, the
//! read-only world snapshot they consume, and the shapes of the checkpoint
//! blob persisted between ticks.
//!
//! No tokio, no tracing: plain data and error types only.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed identifiers (ObjectId, ColonyName, TaskIdentifier, ProcessId)
//! - [`error`]: KernelError, DecodeError, TaskError, ProcessError, LaunchRejection
//! - [`request`]: RequestBatch and its request categories
//! - [`world`]: WorldSnapshot and the objects it exposes
//! - [`blob`]: TaskBlob, ProcessBlob, ProcessState (checkpoint encoding)
//! - [`launch`]: LaunchMessage, ParentRef
//! - [`checkpoint`]: CheckpointManifest

pub mod blob;
pub mod checkpoint;
pub mod error;
pub mod ids;
pub mod launch;
pub mod request;
pub mod world;

pub use blob::{ProcessBlob, ProcessState, TaskBlob};
pub use checkpoint::CheckpointManifest;
pub use error::{
    DecodeError, KernelError, KernelResult, LaunchRejection, ProcessError, TaskError,
};
pub use ids::{ColonyName, ObjectId, ProcessId, TaskIdentifier};
pub use launch::{LaunchMessage, ParentRef};
pub use request::{
    AssignmentRequest, DeviceRequest, Event, LogEntry, LogLevel, Problem, RequestBatch,
    SpawnRequest,
};
pub use world::{Colony, ObjectKind, WorldObject, WorldSnapshot};
