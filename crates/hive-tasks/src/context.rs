//! What a task sees while its own logic runs.

use hive_protocol::{ColonyName, TaskError, TaskIdentifier, WorldSnapshot};
use tracing::{debug, error};

use crate::node::{TaskLogic, TaskNode};

/// Tick-scoped inputs shared by every node of one colony tree.
#[derive(Debug, Clone, Copy)]
pub struct TaskScope<'a> {
    pub world: &'a WorldSnapshot,
    pub colony: &'a ColonyName,
}

impl<'a> TaskScope<'a> {
    pub fn new(world: &'a WorldSnapshot, colony: &'a ColonyName) -> Self {
        Self { world, colony }
    }

    pub fn tick(&self) -> u64 {
        self.world.tick
    }
}

/// Handle passed to [`TaskLogic::run`]. Exposes the running node's own
/// header and children, and nothing belonging to siblings or ancestors.
///
/// Changes made to the children are journaled so the runner can undo them
/// when the run fails.
pub struct TaskContext<'a, K> {
    scope: TaskScope<'a>,
    identifier: &'a TaskIdentifier,
    paused_until: &'a mut Option<u64>,
    children: &'a mut Vec<TaskNode<K>>,
    removed: Vec<TaskNode<K>>,
    repaused: Vec<(TaskIdentifier, Option<u64>)>,
}

/// What a failed run needs to put the children back as they were.
pub(crate) struct ChildJournal<K> {
    removed: Vec<TaskNode<K>>,
    repaused: Vec<(TaskIdentifier, Option<u64>)>,
}

impl<K> ChildJournal<K> {
    /// Restore the children listed in `before`, in that order, with their
    /// pause state as it was. Children started during the run are dropped.
    pub(crate) fn revert(self, children: &mut Vec<TaskNode<K>>, before: &[TaskIdentifier]) {
        let mut restored: Vec<TaskNode<K>> = Vec::new();
        for child in self.removed {
            let original = before.contains(&child.identifier)
                && !restored.iter().any(|r| r.identifier == child.identifier);
            if original {
                restored.push(child);
            }
        }
        children.retain(|child| {
            before.contains(&child.identifier)
                && !restored.iter().any(|r| r.identifier == child.identifier)
        });
        children.extend(restored);
        children.sort_by_key(|child| before.iter().position(|id| *id == child.identifier));

        for (identifier, previous) in self.repaused.into_iter().rev() {
            if let Some(child) = children.iter_mut().find(|c| c.identifier == identifier) {
                child.paused_until = previous;
            }
        }
    }
}

impl<'a, K: TaskLogic> TaskContext<'a, K> {
    pub(crate) fn new(
        scope: TaskScope<'a>,
        identifier: &'a TaskIdentifier,
        paused_until: &'a mut Option<u64>,
        children: &'a mut Vec<TaskNode<K>>,
    ) -> Self {
        Self {
            scope,
            identifier,
            paused_until,
            children,
            removed: Vec::new(),
            repaused: Vec::new(),
        }
    }

    pub(crate) fn into_journal(self) -> ChildJournal<K> {
        ChildJournal {
            removed: self.removed,
            repaused: self.repaused,
        }
    }

    pub fn tick(&self) -> u64 {
        self.scope.tick()
    }

    pub fn world(&self) -> &'a WorldSnapshot {
        self.scope.world
    }

    pub fn colony(&self) -> &'a ColonyName {
        self.scope.colony
    }

    pub fn identifier(&self) -> &TaskIdentifier {
        self.identifier
    }

    /// Origin string to stamp on requests this task produces.
    pub fn origin(&self) -> String {
        self.identifier.to_string()
    }

    pub fn children(&self) -> &[TaskNode<K>] {
        self.children.as_slice()
    }

    pub fn child(&self, identifier: &TaskIdentifier) -> Option<&TaskNode<K>> {
        self.children
            .iter()
            .find(|child| &child.identifier == identifier)
    }

    pub fn has_child(&self, identifier: &TaskIdentifier) -> bool {
        self.child(identifier).is_some()
    }

    /// Adopt `child`. A second child with the same identifier is a
    /// programming error.
    pub fn add_child(&mut self, child: TaskNode<K>) -> Result<(), TaskError> {
        if self.has_child(&child.identifier) {
            error!(
                parent = %self.identifier,
                child = %child.identifier,
                "task already owns a child with this identifier"
            );
            return Err(TaskError::DuplicateChild {
                parent: self.identifier.clone(),
                child: child.identifier,
            });
        }
        debug!(parent = %self.identifier, child = %child.identifier, "child task started");
        self.children.push(child);
        Ok(())
    }

    /// Start a child of kind `logic`, identified by its tag and this colony.
    pub fn start(&mut self, logic: K) -> Result<TaskIdentifier, TaskError> {
        let identifier = TaskIdentifier::derive(logic.type_tag(), self.scope.colony);
        self.start_as(identifier, logic)
    }

    /// Start a child that targets one object; `qualifier` is usually its id.
    pub fn start_for(&mut self, logic: K, qualifier: &str) -> Result<TaskIdentifier, TaskError> {
        let identifier =
            TaskIdentifier::derive_for(logic.type_tag(), self.scope.colony, qualifier);
        self.start_as(identifier, logic)
    }

    fn start_as(&mut self, identifier: TaskIdentifier, logic: K) -> Result<TaskIdentifier, TaskError> {
        let node = TaskNode::new(identifier.clone(), self.tick(), logic);
        self.add_child(node)?;
        Ok(identifier)
    }

    /// Return the child named `identifier`, starting it with `make` first if
    /// it does not exist yet.
    pub fn ensure(
        &mut self,
        identifier: TaskIdentifier,
        make: impl FnOnce() -> K,
    ) -> &TaskNode<K> {
        let position = match self
            .children
            .iter()
            .position(|child| child.identifier == identifier)
        {
            Some(position) => position,
            None => {
                debug!(parent = %self.identifier, child = %identifier, "child task started");
                let tick = self.tick();
                self.children.push(TaskNode::new(identifier, tick, make()));
                self.children.len() - 1
            }
        };
        &self.children[position]
    }

    /// Cancel a child together with its subtree. Returns whether it existed.
    pub fn remove_child(&mut self, identifier: &TaskIdentifier) -> bool {
        let Some(position) = self
            .children
            .iter()
            .position(|child| &child.identifier == identifier)
        else {
            return false;
        };
        debug!(parent = %self.identifier, child = %identifier, "child task cancelled");
        self.removed.push(self.children.remove(position));
        true
    }

    pub fn pause_child_until(
        &mut self,
        identifier: &TaskIdentifier,
        tick: u64,
    ) -> Result<(), TaskError> {
        self.existing_child(identifier)?.pause_until(tick);
        Ok(())
    }

    pub fn pause_child(&mut self, identifier: &TaskIdentifier) -> Result<(), TaskError> {
        self.existing_child(identifier)?.pause_indefinitely();
        Ok(())
    }

    pub fn resume_child(&mut self, identifier: &TaskIdentifier) -> Result<(), TaskError> {
        self.existing_child(identifier)?.resume();
        Ok(())
    }

    fn existing_child(&mut self, identifier: &TaskIdentifier) -> Result<&mut TaskNode<K>, TaskError> {
        let Some(child) = self
            .children
            .iter_mut()
            .find(|child| &child.identifier == identifier)
        else {
            return Err(TaskError::ChildNotFound {
                parent: self.identifier.clone(),
                child: identifier.clone(),
            });
        };
        self.repaused.push((identifier.clone(), child.paused_until));
        Ok(child)
    }

    /// Skip this task (and its subtree) until `tick`.
    pub fn pause_until(&mut self, tick: u64) {
        *self.paused_until = Some(tick);
    }

    /// Skip this task until an ancestor resumes it.
    pub fn pause(&mut self) {
        *self.paused_until = Some(0);
    }
}
