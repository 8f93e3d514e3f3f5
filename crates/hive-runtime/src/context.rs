//! What a process sees while it runs or unloads.

use hive_protocol::{LaunchMessage, ParentRef, ProcessId, RequestBatch, WorldSnapshot};
use serde_json::Value;

/// Lifecycle messages a process queues during its run. Applied by the
/// scheduler after the walk, never mid-walk.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Launch {
        requester: ProcessId,
        message: LaunchMessage,
    },
    Kill {
        requester: ProcessId,
        target: ProcessId,
    },
    Exit(ProcessId),
}

/// A direct child as its parent sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    pub id: ProcessId,
    pub type_tag: &'static str,
    pub label: Option<String>,
}

/// Handle passed to [`crate::ProcessLogic::run`].
///
/// Everything a process produces goes through here: requests for the host,
/// launches of its own children, kills of its own descendants and its own
/// exit. Output of a run that fails is discarded.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    world: &'a WorldSnapshot,
    id: ProcessId,
    children: Vec<ChildInfo>,
    requests: RequestBatch,
    commands: Vec<Command>,
    pause: Option<u64>,
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(world: &'a WorldSnapshot, id: ProcessId, children: Vec<ChildInfo>) -> Self {
        Self {
            world,
            id,
            children,
            requests: RequestBatch::default(),
            commands: Vec::new(),
            pause: None,
        }
    }

    pub fn tick(&self) -> u64 {
        self.world.tick
    }

    pub fn world(&self) -> &'a WorldSnapshot {
        self.world
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Direct children, in run order, as of the start of the run.
    pub fn children(&self) -> &[ChildInfo] {
        &self.children
    }

    /// Labels of the direct children of kind `type_tag`.
    pub fn child_labels(&self, type_tag: &str) -> Vec<String> {
        self.children
            .iter()
            .filter(|child| child.type_tag == type_tag)
            .filter_map(|child| child.label.clone())
            .collect()
    }

    /// Hand requests to the host. Successive batches keep their order.
    pub fn submit(&mut self, batch: RequestBatch) {
        self.requests.absorb(batch);
    }

    pub fn requests_mut(&mut self) -> &mut RequestBatch {
        &mut self.requests
    }

    /// Queue a launch of a child under this process.
    pub fn launch(&mut self, type_tag: impl Into<String>, arguments: Value) {
        self.commands.push(Command::Launch {
            requester: self.id,
            message: LaunchMessage::new(ParentRef::Process(self.id), type_tag, arguments),
        });
    }

    /// Queue a kill of one of this process's descendants.
    pub fn kill(&mut self, target: ProcessId) {
        self.commands.push(Command::Kill {
            requester: self.id,
            target,
        });
    }

    /// Queue this process's own termination, subtree included.
    pub fn exit(&mut self) {
        self.commands.push(Command::Exit(self.id));
    }

    /// Skip this process and its subtree until `tick`; `0` holds until an
    /// operator resumes it.
    pub fn pause_until(&mut self, tick: u64) {
        self.pause = Some(tick);
    }

    pub(crate) fn into_parts(self) -> (RequestBatch, Vec<Command>, Option<u64>) {
        (self.requests, self.commands, self.pause)
    }
}

/// Handle passed to [`crate::ProcessLogic::unload`].
#[derive(Debug)]
pub struct UnloadContext {
    id: ProcessId,
    tick: u64,
    requests: RequestBatch,
}

impl UnloadContext {
    pub(crate) fn new(id: ProcessId, tick: u64) -> Self {
        Self {
            id,
            tick,
            requests: RequestBatch::default(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Last words for the host, e.g. releasing assignments.
    pub fn submit(&mut self, batch: RequestBatch) {
        self.requests.absorb(batch);
    }

    pub(crate) fn into_requests(self) -> RequestBatch {
        self.requests
    }
}
