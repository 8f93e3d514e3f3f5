//! # hive-kernel: tick driver
//!
//! [`Kernel::tick`] is the only entry point a host needs: it loads the
//! checkpoint, rebuilds the process forest against the current world
//! snapshot, boots it if empty, applies queued host commands, runs every
//! process once, and saves the encoded forest. The merged request batch
//! comes back in the [`TickReport`] for the host to act on.

pub mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use hive_protocol::{
    CheckpointManifest, KernelError, LaunchMessage, LaunchRejection, ProcessId, RequestBatch,
    WorldSnapshot,
};
use hive_registry::TypeRegistry;
use hive_runtime::{KillReport, ProcessInfo, ProcessLogic, RunLimit, RunReport, Scheduler};
use hive_store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

pub use config::KernelConfig;

/// Lifecycle changes requested by the host between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Launch(LaunchMessage),
    Kill(ProcessId),
    Suspend(ProcessId),
    Resume(ProcessId),
}

/// Everything one tick produced.
#[derive(Debug, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Merged requests for the host's world-mutation queue.
    pub requests: RequestBatch,
    pub booted: bool,
    /// Subtrees dropped while decoding the checkpoint.
    pub dropped: usize,
    pub ran: usize,
    pub skipped: usize,
    pub failed: usize,
    pub launched: Vec<ProcessId>,
    pub rejected: Vec<LaunchRejection>,
    pub killed: Vec<ProcessId>,
    pub errors: Vec<KernelError>,
    /// Live processes after the tick.
    pub processes: usize,
    pub manifest: Option<CheckpointManifest>,
}

impl TickReport {
    fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    fn launch_outcome(&mut self, outcome: Result<ProcessId, LaunchRejection>) {
        match outcome {
            Ok(id) => self.launched.push(id),
            Err(rejection) => self.rejected.push(rejection),
        }
    }

    fn absorb_kill(&mut self, kill: KillReport) {
        self.killed.extend(kill.killed);
        self.requests.absorb(kill.requests);
    }

    fn absorb_run(&mut self, run: RunReport) {
        self.requests.absorb(run.requests);
        self.ran += run.ran;
        self.skipped += run.skipped;
        self.failed += run.failed;
        self.launched.extend(run.launched);
        self.rejected.extend(run.rejected);
        self.killed.extend(run.killed);
        self.errors.extend(run.errors);
    }
}

pub struct KernelBuilder<P> {
    config: KernelConfig,
    registry: TypeRegistry<P>,
    store: Option<Arc<dyn CheckpointStore>>,
    root: Option<PathBuf>,
}

impl<P: ProcessLogic> KernelBuilder<P> {
    pub fn new(registry: TypeRegistry<P>) -> Self {
        Self {
            config: KernelConfig::default(),
            registry,
            store: None,
            root: None,
        }
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn file_store(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// An explicit store wins over `file_store`; with neither, checkpoints
    /// live in memory. Installs the fault-barrier panic hook, so a panic
    /// contained during a tick is logged once.
    pub fn build(self) -> Kernel<P> {
        hive_guard::install_panic_hook();
        let store: Arc<dyn CheckpointStore> = match (self.store, self.root) {
            (Some(store), _) => store,
            (None, Some(root)) => Arc::new(
                FileCheckpointStore::new(root).with_verify(self.config.verify_checkpoints),
            ),
            (None, None) => Arc::new(MemoryCheckpointStore::new()),
        };
        Kernel {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry),
            store,
            pending: Arc::new(Mutex::new(Vec::new())),
            tick_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Drives one process forest through ticks. Cheap to clone; clones share
/// the store and the queue of host commands.
pub struct Kernel<P> {
    config: Arc<KernelConfig>,
    registry: Arc<TypeRegistry<P>>,
    store: Arc<dyn CheckpointStore>,
    pending: Arc<Mutex<Vec<HostCommand>>>,
    tick_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<P> Clone for Kernel<P> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            pending: Arc::clone(&self.pending),
            tick_lock: Arc::clone(&self.tick_lock),
        }
    }
}

impl<P: ProcessLogic> Kernel<P> {
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Queue a command for the start of the next tick.
    pub fn submit(&self, command: HostCommand) {
        debug!(?command, "host command queued");
        self.pending.lock().push(command);
    }

    pub fn launch(&self, message: LaunchMessage) {
        self.submit(HostCommand::Launch(message));
    }

    pub fn kill(&self, id: ProcessId) {
        self.submit(HostCommand::Kill(id));
    }

    pub fn suspend(&self, id: ProcessId) {
        self.submit(HostCommand::Suspend(id));
    }

    pub fn resume(&self, id: ProcessId) {
        self.submit(HostCommand::Resume(id));
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run one tick against `world`.
    ///
    /// A checkpoint that cannot be read as a process list at all fails the
    /// tick with [`KernelError::CorruptCheckpoint`] and leaves both the
    /// store and the queued host commands untouched. When the save fails the
    /// tick's host commands go back to the front of the queue, since nothing
    /// they changed was persisted.
    #[instrument(skip_all, fields(tick = world.tick, key = %self.config.checkpoint_key))]
    pub async fn tick(&self, world: &WorldSnapshot) -> Result<TickReport> {
        let _serial = self.tick_lock.lock().await;
        let key = self.config.checkpoint_key.as_str();
        let (mut scheduler, dropped) = self.restore(world).await?;
        let mut report = TickReport::new(world.tick);
        report.dropped = dropped;

        if scheduler.is_empty() && !self.config.boot.is_empty() {
            for message in &self.config.boot {
                report.launch_outcome(scheduler.launch(message, world.tick));
            }
            report.booted = true;
            info!(launched = report.launched.len(), "empty forest booted");
        }

        let commands = std::mem::take(&mut *self.pending.lock());
        for command in commands.iter().cloned() {
            self.apply(&mut scheduler, command, world.tick, &mut report);
        }

        let run = match self.config.max_runs_per_tick {
            Some(limit) => scheduler.run_all_with(world, &mut RunLimit::new(limit)),
            None => scheduler.run_all(world),
        };
        report.absorb_run(run);

        let manifest = match self.save(key, world.tick, &scheduler).await {
            Ok(manifest) => manifest,
            Err(error) => {
                self.requeue(commands);
                return Err(error);
            }
        };
        report.processes = scheduler.len();
        report.manifest = Some(manifest);

        info!(
            processes = report.processes,
            ran = report.ran,
            failed = report.failed,
            requests = report.requests.len(),
            "tick finalized"
        );
        Ok(report)
    }

    async fn save(
        &self,
        key: &str,
        tick: u64,
        scheduler: &Scheduler<P>,
    ) -> Result<CheckpointManifest> {
        let blob =
            serde_json::to_vec(&scheduler.checkpoint()).context("failed encoding checkpoint")?;
        self.store
            .save(key, tick, &blob)
            .await
            .context("failed saving checkpoint")
    }

    fn requeue(&self, commands: Vec<HostCommand>) {
        if commands.is_empty() {
            return;
        }
        warn!(commands = commands.len(), "checkpoint not saved, host commands requeued");
        let mut pending = self.pending.lock();
        pending.splice(0..0, commands);
    }

    /// Read-only listing of the stored forest as it decodes against `world`.
    pub async fn tree(&self, world: &WorldSnapshot) -> Result<Vec<ProcessInfo>> {
        let (scheduler, _) = self.restore(world).await?;
        Ok(scheduler.tree())
    }

    async fn restore(&self, world: &WorldSnapshot) -> Result<(Scheduler<P>, usize)> {
        let key = self.config.checkpoint_key.as_str();
        let mut scheduler = Scheduler::new(
            Arc::clone(&self.registry),
            self.config.root_launch_table.iter().cloned(),
        );
        let Some(bytes) = self
            .store
            .load(key)
            .await
            .context("failed loading checkpoint")?
        else {
            debug!("no checkpoint yet, starting from an empty forest");
            return Ok((scheduler, 0));
        };
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|error| KernelError::CorruptCheckpoint(error.to_string()))?;
        let dropped = scheduler.decode(&value, world)?;
        Ok((scheduler, dropped))
    }

    fn apply(
        &self,
        scheduler: &mut Scheduler<P>,
        command: HostCommand,
        tick: u64,
        report: &mut TickReport,
    ) {
        let outcome = match command {
            HostCommand::Launch(message) => {
                report.launch_outcome(scheduler.launch(&message, tick));
                return;
            }
            HostCommand::Kill(id) => scheduler.kill(id, tick).map(|kill| report.absorb_kill(kill)),
            HostCommand::Suspend(id) => scheduler.suspend(id),
            HostCommand::Resume(id) => scheduler.resume(id),
        };
        if let Err(error) = outcome {
            warn!(%error, "host command skipped");
            report.errors.push(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use std::sync::atomic::{AtomicBool, Ordering};

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use hive_protocol::{LogLevel, ObjectKind, ParentRef, ProcessError, WorldObject};
    use hive_registry::decode_fields;
    use hive_runtime::{Launcher, ProcessContext};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tokio::fs;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        runs: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Proc {
        Supervisor(Supervisor),
        Counter(Counter),
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Supervisor;

    impl Launcher for Supervisor {
        fn accept_launch(&mut self, _message: &LaunchMessage) -> Result<(), LaunchRejection> {
            Ok(())
        }
    }

    impl ProcessLogic for Proc {
        fn type_tag(&self) -> &'static str {
            match self {
                Self::Supervisor(_) => "supervisor",
                Self::Counter(_) => "counter",
            }
        }

        fn encode(&self) -> Value {
            match self {
                Self::Supervisor(_) => Value::Null,
                Self::Counter(counter) => serde_json::to_value(counter).unwrap(),
            }
        }

        fn run(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
            match self {
                Self::Supervisor(_) => {
                    if ctx.children().is_empty() {
                        ctx.launch("counter", json!({}));
                    }
                }
                Self::Counter(counter) => {
                    counter.runs += 1;
                    let origin = ctx.id().to_string();
                    ctx.submit(RequestBatch::new().log(
                        origin,
                        LogLevel::Info,
                        format!("run {}", counter.runs),
                    ));
                }
            }
            Ok(())
        }

        fn launcher(&mut self) -> Option<&mut dyn Launcher> {
            match self {
                Self::Supervisor(supervisor) => Some(supervisor),
                Self::Counter(_) => None,
            }
        }
    }

    fn registry() -> TypeRegistry<Proc> {
        TypeRegistry::new()
            .with_launchable(
                "supervisor",
                |_, _| Ok(Proc::Supervisor(Supervisor)),
                |_| Ok(Proc::Supervisor(Supervisor)),
            )
            .and_then(|registry| {
                registry.with_launchable(
                    "counter",
                    |fields, _| decode_fields("counter", fields).map(Proc::Counter),
                    |_| Ok(Proc::Counter(Counter { runs: 0 })),
                )
            })
            .unwrap()
    }

    fn config() -> KernelConfig {
        KernelConfig::default()
            .launchable("supervisor")
            .launchable("counter")
            .boot(LaunchMessage::at_root("supervisor", json!({})))
    }

    fn world(tick: u64) -> WorldSnapshot {
        WorldSnapshot::new(tick).with_object(WorldObject::new("src-1", ObjectKind::Source))
    }

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn state_survives_between_ticks_through_the_checkpoint() -> Result<()> {
        let kernel = KernelBuilder::new(registry()).config(config()).build();

        let first = kernel.tick(&world(1)).await?;
        assert!(first.booted);
        assert_eq!(first.launched, [ProcessId::new(1), ProcessId::new(2)]);
        assert_eq!(first.processes, 2);
        assert_eq!(first.manifest.as_ref().map(|m| m.tick), Some(1));

        let second = kernel.tick(&world(2)).await?;
        assert!(!second.booted);
        assert_eq!(second.ran, 2);
        assert_eq!(second.requests.logs.len(), 1);
        assert_eq!(second.requests.logs[0].message, "run 1");

        let third = kernel.tick(&world(3)).await?;
        assert_eq!(third.requests.logs[0].message, "run 2");
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_checkpoint_halts_the_tick() -> Result<()> {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.seed("forest", "{ not json");
        let kernel = KernelBuilder::new(registry())
            .config(config())
            .store(store.clone())
            .build();
        kernel.kill(ProcessId::new(1));

        let error = kernel.tick(&world(1)).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<KernelError>(),
            Some(KernelError::CorruptCheckpoint(_))
        ));
        assert_eq!(store.raw("forest"), Some(b"{ not json".to_vec()));
        assert_eq!(kernel.pending_commands(), 1);

        store.seed("forest", r#"{"id": 1}"#);
        assert!(kernel.tick(&world(2)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn host_commands_apply_at_the_next_tick() -> Result<()> {
        let kernel = KernelBuilder::new(registry()).config(config()).build();
        kernel.tick(&world(1)).await?;

        kernel.launch(LaunchMessage::new(ParentRef::Process(ProcessId::new(1)), "counter", json!({})));
        kernel.launch(LaunchMessage::at_root("ghost", json!({})));
        kernel.suspend(ProcessId::new(2));
        let report = kernel.tick(&world(2)).await?;
        assert_eq!(report.launched, [ProcessId::new(3)]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(kernel.pending_commands(), 0);

        kernel.kill(ProcessId::new(1));
        kernel.resume(ProcessId::new(42));
        let report = kernel.tick(&world(3)).await?;
        assert_eq!(
            report.killed,
            [ProcessId::new(2), ProcessId::new(3), ProcessId::new(1)]
        );
        assert_eq!(
            report.errors,
            [KernelError::ProcessNotFound(ProcessId::new(42))]
        );
        assert_eq!(report.processes, 0);

        let report = kernel.tick(&world(4)).await?;
        assert!(report.booted);
        assert_eq!(report.launched, [ProcessId::new(1), ProcessId::new(2)]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_entries_are_dropped_and_siblings_run() -> Result<()> {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.seed(
            "forest",
            json!([
                { "id": 3, "running": true, "state": { "t": "retired" } },
                { "id": 5, "running": true, "state": { "t": "counter", "f": { "runs": 9 } } }
            ])
            .to_string(),
        );
        let kernel = KernelBuilder::new(registry()).store(store).build();

        let report = kernel.tick(&world(4)).await?;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.ran, 1);
        assert_eq!(report.requests.logs[0].message, "run 10");

        let tree = kernel.tree(&world(5)).await?;
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, ProcessId::new(5));
        Ok(())
    }

    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryCheckpointStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl CheckpointStore for FlakyStore {
        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, tick: u64, blob: &[u8]) -> Result<CheckpointManifest> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("disk full");
            }
            self.inner.save(key, tick, blob).await
        }

        async fn manifest(&self, key: &str) -> Result<Option<CheckpointManifest>> {
            self.inner.manifest(key).await
        }
    }

    #[tokio::test]
    async fn failed_save_keeps_host_commands_for_the_next_tick() -> Result<()> {
        let store = Arc::new(FlakyStore::default());
        let kernel = KernelBuilder::new(registry())
            .config(config())
            .store(store.clone())
            .build();
        kernel.tick(&world(1)).await?;

        store.failing.store(true, Ordering::SeqCst);
        kernel.kill(ProcessId::new(2));
        kernel.suspend(ProcessId::new(1));
        assert!(kernel.tick(&world(2)).await.is_err());
        assert_eq!(kernel.pending_commands(), 2);

        kernel.resume(ProcessId::new(1));
        store.failing.store(false, Ordering::SeqCst);
        let report = kernel.tick(&world(3)).await?;
        assert_eq!(report.killed, [ProcessId::new(2)]);
        assert_eq!(report.skipped, 0);
        assert_eq!(kernel.pending_commands(), 0);
        assert_eq!(report.manifest.as_ref().map(|m| m.tick), Some(3));
        Ok(())
    }

    #[test]
    fn building_a_kernel_installs_the_panic_hook() {
        let _kernel = KernelBuilder::new(registry()).build();
        assert!(hive_guard::panic_hook_installed());
    }

    #[tokio::test]
    async fn run_limit_defers_processes() -> Result<()> {
        let kernel = KernelBuilder::new(registry())
            .config(config().max_runs_per_tick(1))
            .build();
        kernel.tick(&world(1)).await?;
        let report = kernel.tick(&world(2)).await?;
        assert_eq!(report.ran, 1);
        assert_eq!(report.skipped, 1);
        Ok(())
    }

    #[tokio::test]
    async fn file_store_carries_the_forest_across_restarts() -> Result<()> {
        let root = unique_test_root("hive-kernel-restart");
        let kernel = KernelBuilder::new(registry())
            .config(config())
            .file_store(&root)
            .build();
        kernel.tick(&world(1)).await?;
        kernel.tick(&world(2)).await?;
        drop(kernel);

        let restarted = KernelBuilder::new(registry())
            .config(config())
            .file_store(&root)
            .build();
        let report = restarted.tick(&world(3)).await?;
        assert!(!report.booted);
        assert_eq!(report.requests.logs[0].message, "run 2");
        assert!(fs::try_exists(root.join("checkpoints/forest.manifest.json")).await?);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
