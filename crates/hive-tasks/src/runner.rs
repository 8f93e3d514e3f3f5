//! Depth-first, bottom-up execution of a task tree.

use std::panic::{self, AssertUnwindSafe};

use hive_guard::{UnitLabel, guard};
use hive_protocol::{RequestBatch, TaskError, TaskIdentifier};
use tracing::{debug, trace};

use crate::context::{TaskContext, TaskScope};
use crate::node::{TaskLogic, TaskNode, TaskStatus};

/// Run `node` for one tick.
///
/// Children run first, each behind a fault barrier, in their stored order.
/// Finished and failed children are pruned before the node's own logic sees
/// the merged requests of its children. A paused node returns an empty
/// `InProgress` without touching its subtree. When the node's own logic
/// errors or panics, whatever it did to its children and its own pause is
/// undone before the failure travels up.
pub fn run_task<K: TaskLogic>(
    node: &mut TaskNode<K>,
    scope: TaskScope<'_>,
) -> Result<TaskStatus, TaskError> {
    let tick = scope.tick();
    if node.is_paused(tick) {
        trace!(task = %node.identifier, paused_until = ?node.paused_until, "task paused");
        return Ok(TaskStatus::idle());
    }
    if node.paused_until.is_some() {
        node.paused_until = None;
    }

    let mut collected = Vec::with_capacity(node.children.len());
    node.children.retain_mut(|child| {
        let identifier = child.identifier.clone();
        let label = UnitLabel::new(child.type_tag(), identifier.as_str());
        let status = guard(&label, || run_task(child, scope)).unwrap_or_else(TaskStatus::idle);
        match status {
            TaskStatus::InProgress(requests) => {
                collected.push(requests);
                true
            }
            TaskStatus::Finished => {
                debug!(task = %identifier, "child task finished");
                false
            }
            TaskStatus::Failed(requests) => {
                debug!(
                    task = %identifier,
                    requests = requests.len(),
                    "child task failed"
                );
                collected.push(requests);
                false
            }
        }
    });

    let requests = RequestBatch::merge(collected);
    let before: Vec<TaskIdentifier> = node
        .children
        .iter()
        .map(|child| child.identifier.clone())
        .collect();
    let own_pause = node.paused_until;

    let TaskNode {
        identifier,
        paused_until,
        logic,
        children,
        ..
    } = node;
    let mut ctx = TaskContext::new(scope, identifier, paused_until, children);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| logic.run(&mut ctx, requests)));
    let journal = ctx.into_journal();

    match outcome {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(error)) => {
            journal.revert(&mut node.children, &before);
            node.paused_until = own_pause;
            Err(error)
        }
        Err(payload) => {
            journal.revert(&mut node.children, &before);
            node.paused_until = own_pause;
            panic::resume_unwind(payload)
        }
    }
}

/// Run the root of a colony tree behind its own barrier. Used by the
/// per-colony driver, which has no parent runner to catch failures for it.
pub fn run_root<K: TaskLogic>(root: &mut TaskNode<K>, scope: TaskScope<'_>) -> TaskStatus {
    let identifier = root.identifier.clone();
    let label = UnitLabel::new(root.type_tag(), identifier.as_str());
    guard(&label, || run_task(root, scope)).unwrap_or_else(TaskStatus::idle)
}
