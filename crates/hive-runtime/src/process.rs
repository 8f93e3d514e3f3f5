use hive_protocol::{LaunchMessage, LaunchRejection, ProcessError, ProcessId};
use serde_json::Value;

use crate::context::{ProcessContext, UnloadContext};

/// Behaviour of one process kind.
///
/// Implemented by the caller's closed enum of process kinds. The scheduler
/// owns ids, nesting and lifecycle; a kind only supplies its own step.
pub trait ProcessLogic: Sized {
    fn type_tag(&self) -> &'static str;

    /// Own fields for the checkpoint. Child processes are encoded by the
    /// scheduler.
    fn encode(&self) -> Value;

    fn run(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError>;

    /// What this instance looks after, if anything. The parent sees it next
    /// to the child's id on every run.
    fn label(&self) -> Option<String> {
        None
    }

    /// Called once when the process is killed, after all of its
    /// descendants were unloaded.
    fn unload(&mut self, ctx: &mut UnloadContext) -> Result<(), ProcessError> {
        let _ = ctx;
        Ok(())
    }

    /// Processes that may host children expose a launcher.
    fn launcher(&mut self) -> Option<&mut dyn Launcher> {
        None
    }
}

/// Capability of a process that accepts child launches.
pub trait Launcher {
    /// Vet a launch targeted at this process. Returning an error rejects it
    /// before any state is built.
    fn accept_launch(&mut self, message: &LaunchMessage) -> Result<(), LaunchRejection>;
}

/// One node of the process forest.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEntry<P> {
    pub(crate) id: ProcessId,
    pub(crate) running: bool,
    pub(crate) started_at: u64,
    pub(crate) paused_until: Option<u64>,
    pub(crate) logic: P,
    pub(crate) children: Vec<ProcessEntry<P>>,
}

impl<P: ProcessLogic> ProcessEntry<P> {
    pub(crate) fn new(id: ProcessId, started_at: u64, logic: P) -> Self {
        Self {
            id,
            running: true,
            started_at,
            paused_until: None,
            logic,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn type_tag(&self) -> &'static str {
        self.logic.type_tag()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn paused_until(&self) -> Option<u64> {
        self.paused_until
    }

    /// Same rule as for tasks: `Some(0)` holds until resumed, `Some(t)`
    /// holds while `tick < t`.
    pub fn is_paused(&self, tick: u64) -> bool {
        match self.paused_until {
            Some(0) => true,
            Some(until) => tick < until,
            None => false,
        }
    }

    pub fn logic(&self) -> &P {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut P {
        &mut self.logic
    }

    pub fn children(&self) -> &[ProcessEntry<P>] {
        &self.children
    }

    pub fn subtree_len(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(ProcessEntry::subtree_len)
            .sum::<usize>()
    }

    /// Ids of this subtree, parents before children.
    pub fn subtree_ids(&self) -> Vec<ProcessId> {
        let mut ids = Vec::with_capacity(self.subtree_len());
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<ProcessId>) {
        ids.push(self.id);
        for child in &self.children {
            child.collect_ids(ids);
        }
    }

    pub fn find(&self, id: ProcessId) -> Option<&ProcessEntry<P>> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

pub(crate) fn find_in<P: ProcessLogic>(
    entries: &[ProcessEntry<P>],
    id: ProcessId,
) -> Option<&ProcessEntry<P>> {
    entries.iter().find_map(|entry| entry.find(id))
}

pub(crate) fn find_in_mut<P: ProcessLogic>(
    entries: &mut [ProcessEntry<P>],
    id: ProcessId,
) -> Option<&mut ProcessEntry<P>> {
    for entry in entries {
        if entry.id == id {
            return Some(entry);
        }
        if let Some(found) = find_in_mut(&mut entry.children, id) {
            return Some(found);
        }
    }
    None
}

/// Detach the entry `id` from wherever it lives in the forest.
pub(crate) fn detach<P: ProcessLogic>(
    entries: &mut Vec<ProcessEntry<P>>,
    id: ProcessId,
) -> Option<ProcessEntry<P>> {
    if let Some(position) = entries.iter().position(|entry| entry.id == id) {
        return Some(entries.remove(position));
    }
    entries
        .iter_mut()
        .find_map(|entry| detach(&mut entry.children, id))
}
