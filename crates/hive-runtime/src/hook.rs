//! Extension point around each process run.

use hive_protocol::ProcessId;
use tracing::debug;

/// Observes or gates the scheduler walk without touching process logic.
pub trait SchedulerHook {
    /// Return `false` to defer this process and its subtree to a later tick.
    fn before_run(&mut self, id: ProcessId, type_tag: &str) -> bool {
        let _ = (id, type_tag);
        true
    }

    /// `completed` is false when the run failed or panicked.
    fn after_run(&mut self, id: ProcessId, type_tag: &str, completed: bool) {
        let _ = (id, type_tag, completed);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl SchedulerHook for NoopHook {}

/// Caps how many processes run in one walk. The rest wait for the next tick.
#[derive(Debug, Clone, Copy)]
pub struct RunLimit {
    remaining: usize,
}

impl RunLimit {
    pub fn new(limit: usize) -> Self {
        Self { remaining: limit }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl SchedulerHook for RunLimit {
    fn before_run(&mut self, id: ProcessId, type_tag: &str) -> bool {
        if self.remaining == 0 {
            debug!(process = %id, type_tag, "run limit reached, deferring");
            return false;
        }
        self.remaining -= 1;
        true
    }
}
