use std::sync::Arc;

use hive_guard::{UnitLabel, guard};
use hive_protocol::{
    KernelError, KernelResult, LaunchMessage, LaunchRejection, ParentRef, ProcessBlob, ProcessId,
    ProcessState, RequestBatch, WorldSnapshot,
};
use hive_registry::TypeRegistry;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::context::{ChildInfo, Command, ProcessContext, UnloadContext};
use crate::hook::{NoopHook, SchedulerHook};
use crate::process::{ProcessEntry, ProcessLogic, detach, find_in, find_in_mut};

const FIRST_ID: ProcessId = ProcessId::new(1);

/// Outcome of one scheduler walk, lifecycle messages included.
#[derive(Debug, Default, PartialEq)]
pub struct RunReport {
    /// Requests submitted by processes that completed, in walk order,
    /// followed by unload output of processes killed after the walk.
    pub requests: RequestBatch,
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
    pub launched: Vec<ProcessId>,
    pub rejected: Vec<LaunchRejection>,
    pub killed: Vec<ProcessId>,
    pub errors: Vec<KernelError>,
}

impl RunReport {
    fn absorb_kill(&mut self, kill: KillReport) {
        self.killed.extend(kill.killed);
        self.requests.absorb(kill.requests);
    }
}

/// Everything removed by one kill, deepest first.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct KillReport {
    pub killed: Vec<ProcessId>,
    pub requests: RequestBatch,
}

/// Read-only row of [`Scheduler::tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub parent: ParentRef,
    pub type_tag: String,
    pub running: bool,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<u64>,
    pub depth: usize,
}

/// Owns the process forest for one tick: rebuilds it from the checkpoint,
/// walks it, applies lifecycle changes and encodes it again.
pub struct Scheduler<P> {
    roots: Vec<ProcessEntry<P>>,
    registry: Arc<TypeRegistry<P>>,
    launch_table: IndexSet<String>,
    live: IndexSet<ProcessId>,
    next_id: ProcessId,
}

impl<P: ProcessLogic> Scheduler<P> {
    pub fn new<I, S>(registry: Arc<TypeRegistry<P>>, launch_table: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: Vec::new(),
            registry,
            launch_table: launch_table.into_iter().map(Into::into).collect(),
            live: IndexSet::new(),
            next_id: FIRST_ID,
        }
    }

    pub fn registry(&self) -> &TypeRegistry<P> {
        &self.registry
    }

    /// Type tags the root may launch directly.
    pub fn launch_table(&self) -> impl Iterator<Item = &str> {
        self.launch_table.iter().map(String::as_str)
    }

    pub fn roots(&self) -> &[ProcessEntry<P>] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.live.contains(&id)
    }

    pub fn get(&self, id: ProcessId) -> Option<&ProcessEntry<P>> {
        find_in(&self.roots, id)
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut ProcessEntry<P>> {
        find_in_mut(&mut self.roots, id)
    }

    /// Flat pre-order listing of the forest.
    pub fn tree(&self) -> Vec<ProcessInfo> {
        fn visit<P: ProcessLogic>(
            entry: &ProcessEntry<P>,
            parent: ParentRef,
            depth: usize,
            rows: &mut Vec<ProcessInfo>,
        ) {
            rows.push(ProcessInfo {
                id: entry.id,
                parent,
                type_tag: entry.type_tag().to_owned(),
                running: entry.running,
                started_at: entry.started_at,
                paused_until: entry.paused_until,
                depth,
            });
            for child in &entry.children {
                visit(child, ParentRef::Process(entry.id), depth + 1, rows);
            }
        }

        let mut rows = Vec::with_capacity(self.live.len());
        for root in &self.roots {
            visit(root, ParentRef::Root, 0, &mut rows);
        }
        rows
    }

    /// Replace the forest with the one stored in `checkpoint`.
    ///
    /// Entries that cannot be rebuilt are dropped one subtree at a time and
    /// counted in the returned total. Only a checkpoint that is not a list
    /// at all is fatal.
    #[instrument(skip_all, fields(tick = world.tick))]
    pub fn decode(&mut self, checkpoint: &Value, world: &WorldSnapshot) -> KernelResult<usize> {
        let Value::Array(items) = checkpoint else {
            error!("checkpoint is not a list of root processes");
            return Err(KernelError::CorruptCheckpoint(
                "expected a list of root processes".to_owned(),
            ));
        };

        self.roots.clear();
        self.live.clear();
        let mut dropped = 0;
        for (position, item) in items.iter().enumerate() {
            let blob = match ProcessBlob::deserialize(item) {
                Ok(blob) => blob,
                Err(error) => {
                    warn!(position, %error, "unreadable root process entry dropped");
                    dropped += 1;
                    continue;
                }
            };
            if let Some(entry) = self.decode_entry(&blob, world, &mut dropped) {
                self.roots.push(entry);
            }
        }
        self.next_id = self
            .live
            .iter()
            .copied()
            .max()
            .and_then(ProcessId::next)
            .unwrap_or(FIRST_ID);
        debug!(
            processes = self.live.len(),
            dropped,
            next_id = %self.next_id,
            "process forest decoded"
        );
        Ok(dropped)
    }

    fn decode_entry(
        &mut self,
        blob: &ProcessBlob,
        world: &WorldSnapshot,
        dropped: &mut usize,
    ) -> Option<ProcessEntry<P>> {
        if let Err(error) = self.claim(blob.id) {
            error!(
                process = %blob.id,
                type_tag = %blob.state.type_tag,
                %error,
                "process subtree dropped during decode"
            );
            *dropped += 1;
            return None;
        }
        let logic = match self
            .registry
            .decode(&blob.state.type_tag, &blob.state.fields, world)
        {
            Ok(logic) => logic,
            Err(reason) => {
                self.live.shift_remove(&blob.id);
                warn!(
                    process = %blob.id,
                    type_tag = %blob.state.type_tag,
                    %reason,
                    "process subtree dropped during decode"
                );
                *dropped += 1;
                return None;
            }
        };

        let mut entry = ProcessEntry {
            id: blob.id,
            running: blob.running,
            started_at: blob.started_at,
            paused_until: blob.paused_until,
            logic,
            children: Vec::with_capacity(blob.state.children.len()),
        };
        for child in &blob.state.children {
            if let Some(child) = self.decode_entry(child, world, dropped) {
                entry.children.push(child);
            }
        }
        Some(entry)
    }

    fn claim(&mut self, id: ProcessId) -> KernelResult<()> {
        if !self.live.insert(id) {
            return Err(KernelError::IdReuse(id));
        }
        Ok(())
    }

    /// Encode the forest, roots in order, nesting and ids preserved.
    pub fn checkpoint(&self) -> Vec<ProcessBlob> {
        self.roots.iter().map(encode_entry).collect()
    }

    /// Create a process from a launch message.
    ///
    /// Launching at the root requires the tag in the root launch table; a
    /// process parent must expose a [`crate::Launcher`] that accepts the
    /// message. Every rejection is logged once and returned.
    #[instrument(
        skip(self, message),
        fields(parent = %message.target_parent, type_tag = %message.type_tag)
    )]
    pub fn launch(
        &mut self,
        message: &LaunchMessage,
        tick: u64,
    ) -> Result<ProcessId, LaunchRejection> {
        match self.try_launch(message, tick) {
            Ok(id) => {
                info!(process = %id, "process launched");
                Ok(id)
            }
            Err(rejection) => {
                warn!(%rejection, "launch rejected");
                Err(rejection)
            }
        }
    }

    fn try_launch(
        &mut self,
        message: &LaunchMessage,
        tick: u64,
    ) -> Result<ProcessId, LaunchRejection> {
        match message.target_parent {
            ParentRef::Root => {
                if !self.launch_table.contains(&message.type_tag) {
                    return Err(LaunchRejection::NotLaunchable {
                        type_tag: message.type_tag.clone(),
                    });
                }
            }
            ParentRef::Process(parent) => {
                let entry = find_in_mut(&mut self.roots, parent)
                    .ok_or(LaunchRejection::ParentNotFound(parent))?;
                let type_tag = entry.type_tag();
                let launcher =
                    entry
                        .logic
                        .launcher()
                        .ok_or_else(|| LaunchRejection::NoLauncherCapability {
                            parent,
                            type_tag: type_tag.to_owned(),
                        })?;
                launcher.accept_launch(message)?;
            }
        }

        let logic = self
            .registry
            .construct(&message.type_tag, &message.arguments)?;
        let id = self.allocate()?;
        let entry = ProcessEntry::new(id, tick, logic);
        match message.target_parent {
            ParentRef::Root => self.roots.push(entry),
            ParentRef::Process(parent) => match find_in_mut(&mut self.roots, parent) {
                Some(parent) => parent.children.push(entry),
                None => {
                    self.live.shift_remove(&id);
                    return Err(LaunchRejection::ParentNotFound(parent));
                }
            },
        }
        Ok(id)
    }

    /// Lowest free id from `next_id` upward, wrapping to the bottom of the
    /// range once when the top is reached.
    fn allocate(&mut self) -> Result<ProcessId, LaunchRejection> {
        let mut id = self.next_id;
        let mut wrapped = false;
        while self.live.contains(&id) {
            id = match id.next() {
                Some(next) => next,
                None if !wrapped => {
                    wrapped = true;
                    FIRST_ID
                }
                None => return Err(LaunchRejection::IdSpaceExhausted),
            };
        }
        self.next_id = id.next().unwrap_or(FIRST_ID);
        self.live.insert(id);
        Ok(id)
    }

    /// Stop running `id` and its subtree until resumed.
    pub fn suspend(&mut self, id: ProcessId) -> KernelResult<()> {
        let entry = self.entry_mut(id)?;
        entry.running = false;
        debug!(process = %id, "process suspended");
        Ok(())
    }

    /// Undo a suspend, and any pause.
    pub fn resume(&mut self, id: ProcessId) -> KernelResult<()> {
        let entry = self.entry_mut(id)?;
        entry.running = true;
        entry.paused_until = None;
        debug!(process = %id, "process resumed");
        Ok(())
    }

    pub fn pause_until(&mut self, id: ProcessId, tick: u64) -> KernelResult<()> {
        self.entry_mut(id)?.paused_until = Some(tick);
        Ok(())
    }

    fn entry_mut(&mut self, id: ProcessId) -> KernelResult<&mut ProcessEntry<P>> {
        find_in_mut(&mut self.roots, id).ok_or(KernelError::ProcessNotFound(id))
    }

    /// Kill `id` and everything below it. Descendants unload before their
    /// ancestors; their ids are free again afterwards.
    #[instrument(skip(self))]
    pub fn kill(&mut self, id: ProcessId, tick: u64) -> KernelResult<KillReport> {
        let mut entry = detach(&mut self.roots, id).ok_or(KernelError::ProcessNotFound(id))?;
        let mut report = KillReport::default();
        unload_subtree(&mut entry, tick, &mut report);
        for killed in &report.killed {
            self.live.shift_remove(killed);
        }
        info!(process = %id, killed = report.killed.len(), "process killed");
        Ok(report)
    }

    /// Kill on behalf of `requester`, which may only target its own
    /// descendants.
    pub fn kill_descendant(
        &mut self,
        requester: ProcessId,
        target: ProcessId,
        tick: u64,
    ) -> KernelResult<KillReport> {
        let owner = self
            .get(requester)
            .ok_or(KernelError::ProcessNotFound(requester))?;
        let owned = owner
            .children
            .iter()
            .any(|child| child.find(target).is_some());
        if !owned {
            if !self.contains(target) {
                return Err(KernelError::ProcessNotFound(target));
            }
            return Err(KernelError::NotOwned { requester, target });
        }
        self.kill(target, tick)
    }

    pub fn run_all(&mut self, world: &WorldSnapshot) -> RunReport {
        self.run_all_with(world, &mut NoopHook)
    }

    /// Walk the forest once, parents before children, each run behind a
    /// fault barrier. Launches, kills and exits queued by processes are
    /// applied after the walk, in the order they were queued.
    #[instrument(skip_all, fields(tick = world.tick, processes = self.live.len()))]
    pub fn run_all_with(
        &mut self,
        world: &WorldSnapshot,
        hook: &mut dyn SchedulerHook,
    ) -> RunReport {
        let mut report = RunReport::default();
        let mut commands = Vec::new();
        for entry in &mut self.roots {
            run_entry(entry, world, hook, &mut report, &mut commands);
        }
        self.apply(commands, world.tick, &mut report);
        debug!(
            ran = report.ran,
            skipped = report.skipped,
            failed = report.failed,
            launched = report.launched.len(),
            killed = report.killed.len(),
            "process walk complete"
        );
        report
    }

    fn apply(&mut self, commands: Vec<Command>, tick: u64, report: &mut RunReport) {
        for command in commands {
            match command {
                Command::Launch { requester, message } => {
                    if !self.contains(requester) {
                        debug!(process = %requester, "launch from a process killed this tick dropped");
                        continue;
                    }
                    match self.launch(&message, tick) {
                        Ok(id) => report.launched.push(id),
                        Err(rejection) => report.rejected.push(rejection),
                    }
                }
                Command::Kill { requester, target } => {
                    match self.kill_descendant(requester, target, tick) {
                        Ok(kill) => report.absorb_kill(kill),
                        Err(error @ KernelError::NotOwned { .. }) => {
                            error!(%error, "kill refused");
                            report.errors.push(error);
                        }
                        Err(error) => {
                            warn!(%error, "kill skipped");
                            report.errors.push(error);
                        }
                    }
                }
                Command::Exit(id) => {
                    if !self.contains(id) {
                        continue;
                    }
                    match self.kill(id, tick) {
                        Ok(kill) => report.absorb_kill(kill),
                        Err(error) => report.errors.push(error),
                    }
                }
            }
        }
    }
}

impl<P> std::fmt::Debug for Scheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("live", &self.live)
            .field("launch_table", &self.launch_table)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

fn encode_entry<P: ProcessLogic>(entry: &ProcessEntry<P>) -> ProcessBlob {
    ProcessBlob {
        id: entry.id,
        running: entry.running,
        started_at: entry.started_at,
        paused_until: entry.paused_until,
        state: ProcessState {
            type_tag: entry.type_tag().to_owned(),
            fields: entry.logic.encode(),
            children: entry.children.iter().map(encode_entry).collect(),
        },
    }
}

fn run_entry<P: ProcessLogic>(
    entry: &mut ProcessEntry<P>,
    world: &WorldSnapshot,
    hook: &mut dyn SchedulerHook,
    report: &mut RunReport,
    commands: &mut Vec<Command>,
) {
    let tick = world.tick;
    if !entry.running || entry.is_paused(tick) {
        trace!(process = %entry.id, running = entry.running, "process subtree skipped");
        report.skipped += entry.subtree_len();
        return;
    }
    if entry.paused_until.is_some() {
        entry.paused_until = None;
    }
    let type_tag = entry.type_tag();
    if !hook.before_run(entry.id, type_tag) {
        report.skipped += entry.subtree_len();
        return;
    }

    let children = entry
        .children
        .iter()
        .map(|child| ChildInfo {
            id: child.id,
            type_tag: child.type_tag(),
            label: child.logic.label(),
        })
        .collect();
    let mut ctx = ProcessContext::new(world, entry.id, children);
    let id_text = entry.id.to_string();
    let label = UnitLabel::new(type_tag, &id_text);
    let completed = guard(&label, || entry.logic.run(&mut ctx)).is_some();
    hook.after_run(entry.id, type_tag, completed);

    if completed {
        report.ran += 1;
        let (requests, queued, pause) = ctx.into_parts();
        report.requests.absorb(requests);
        commands.extend(queued);
        if let Some(until) = pause {
            entry.paused_until = Some(until);
        }
    } else {
        report.failed += 1;
    }

    for child in &mut entry.children {
        run_entry(child, world, hook, report, commands);
    }
}

fn unload_subtree<P: ProcessLogic>(entry: &mut ProcessEntry<P>, tick: u64, report: &mut KillReport) {
    for child in &mut entry.children {
        unload_subtree(child, tick, report);
    }
    let mut ctx = UnloadContext::new(entry.id, tick);
    let id_text = entry.id.to_string();
    let label = UnitLabel::new(entry.type_tag(), &id_text);
    if guard(&label, || entry.logic.unload(&mut ctx)).is_some() {
        report.requests.absorb(ctx.into_requests());
    }
    report.killed.push(entry.id);
}
