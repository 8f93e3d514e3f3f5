//! Task nodes and the capability a task kind implements.

use hive_protocol::{RequestBatch, TaskError, TaskIdentifier};
use serde_json::Value;

use crate::codec::DroppedChild;
use crate::context::TaskContext;

/// Result of one task run, as seen by its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Keep the task; deliver its requests upward.
    InProgress(RequestBatch),
    /// Remove the task; it has nothing more to say.
    Finished,
    /// Remove the task, but deliver its requests upward this one time.
    Failed(RequestBatch),
}

impl TaskStatus {
    /// `InProgress` with no requests. Also what a neutralised failure turns into.
    pub fn idle() -> Self {
        Self::InProgress(RequestBatch::default())
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InProgress(_))
    }

    pub fn requests(&self) -> Option<&RequestBatch> {
        match self {
            Self::InProgress(batch) | Self::Failed(batch) => Some(batch),
            Self::Finished => None,
        }
    }
}

/// Behaviour of one task kind.
///
/// Implemented by the caller's closed enum of kinds; the runner owns
/// traversal and pruning, the kind only supplies its own step.
pub trait TaskLogic: Sized {
    /// Short registry tag, also the prefix of derived identifiers.
    fn type_tag(&self) -> &'static str;

    /// Own fields for the checkpoint. Children are encoded by the node.
    fn encode(&self) -> Value;

    /// Own step for this tick, after children ran and were pruned.
    /// `requests` holds the merged output of the surviving and failed
    /// children, in child order.
    fn run(
        &mut self,
        ctx: &mut TaskContext<'_, Self>,
        requests: RequestBatch,
    ) -> Result<TaskStatus, TaskError>;

    /// Asked during decode when a child could not be rebuilt. Returning
    /// `false` drops this task as well.
    fn keep_without_child(&self, dropped: &DroppedChild) -> bool {
        let _ = dropped;
        true
    }
}

/// A colony-scoped unit of work owning an ordered list of children.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode<K> {
    pub(crate) identifier: TaskIdentifier,
    pub(crate) start_time: u64,
    pub(crate) paused_until: Option<u64>,
    pub(crate) logic: K,
    pub(crate) children: Vec<TaskNode<K>>,
}

impl<K: TaskLogic> TaskNode<K> {
    pub fn new(identifier: TaskIdentifier, start_time: u64, logic: K) -> Self {
        Self {
            identifier,
            start_time,
            paused_until: None,
            logic,
            children: Vec::new(),
        }
    }

    /// Attach a child while building a tree outside of a run. Duplicate
    /// identifiers are rejected the same way [`TaskContext::add_child`]
    /// rejects them.
    pub fn with_child(mut self, child: TaskNode<K>) -> Result<Self, TaskError> {
        if self.has_child(&child.identifier) {
            return Err(TaskError::DuplicateChild {
                parent: self.identifier.clone(),
                child: child.identifier,
            });
        }
        self.children.push(child);
        Ok(self)
    }

    pub fn type_tag(&self) -> &'static str {
        self.logic.type_tag()
    }

    pub fn identifier(&self) -> &TaskIdentifier {
        &self.identifier
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn paused_until(&self) -> Option<u64> {
        self.paused_until
    }

    /// `Some(0)` pauses until explicitly resumed; `Some(t)` pauses while
    /// `tick < t`.
    pub fn is_paused(&self, tick: u64) -> bool {
        match self.paused_until {
            Some(0) => true,
            Some(until) => tick < until,
            None => false,
        }
    }

    pub fn pause_until(&mut self, tick: u64) {
        self.paused_until = Some(tick);
    }

    pub fn pause_indefinitely(&mut self) {
        self.paused_until = Some(0);
    }

    pub fn resume(&mut self) {
        self.paused_until = None;
    }

    pub fn logic(&self) -> &K {
        &self.logic
    }

    pub fn logic_mut(&mut self) -> &mut K {
        &mut self.logic
    }

    pub fn children(&self) -> &[TaskNode<K>] {
        &self.children
    }

    pub fn child(&self, identifier: &TaskIdentifier) -> Option<&TaskNode<K>> {
        self.children
            .iter()
            .find(|child| &child.identifier == identifier)
    }

    pub fn has_child(&self, identifier: &TaskIdentifier) -> bool {
        self.child(identifier).is_some()
    }

    /// Number of nodes in this subtree, including this one.
    pub fn subtree_len(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TaskNode::subtree_len)
            .sum::<usize>()
    }
}
