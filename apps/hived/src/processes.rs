//! Process kinds of the daemon: one overseer at the root and one colony
//! process per owned colony, each driving that colony's task tree.

use std::sync::Arc;

use hive_kernel::KernelConfig;
use hive_protocol::{
    ColonyName, KernelResult, LaunchMessage, LaunchRejection, LogLevel, ProcessError, RequestBatch,
    TaskBlob, TaskIdentifier,
};
use hive_registry::{TypeRegistry, decode_fields};
use hive_runtime::{Launcher, ProcessContext, ProcessLogic, UnloadContext};
use hive_tasks::{TaskNode, TaskScope, TaskStatus, run_root};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::tasks::ColonyTask;

pub const OVERSEER: &str = "overseer";
pub const COLONY: &str = "colony";

#[derive(Debug, Clone, PartialEq)]
pub enum HiveProcess {
    Overseer(Overseer),
    Colony(ColonyProcess),
}

/// Keeps exactly one colony process per colony present in the world. A
/// colony counts as covered only while a live child carries its name, so a
/// launch that was rejected or a child the host killed is retried on the
/// next run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overseer {}

impl Launcher for Overseer {
    fn accept_launch(&mut self, message: &LaunchMessage) -> Result<(), LaunchRejection> {
        if message.type_tag != COLONY {
            return Err(LaunchRejection::NotLaunchable {
                type_tag: message.type_tag.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColonyProcess {
    pub colony: ColonyName,
    pub tree: Option<TaskNode<ColonyTask>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColonyState {
    colony: ColonyName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tree: Option<TaskBlob>,
}

#[derive(Debug, Deserialize)]
struct ColonyArgs {
    colony: ColonyName,
}

impl ProcessLogic for HiveProcess {
    fn type_tag(&self) -> &'static str {
        match self {
            Self::Overseer(_) => OVERSEER,
            Self::Colony(_) => COLONY,
        }
    }

    fn encode(&self) -> Value {
        let encoded = match self {
            Self::Overseer(overseer) => serde_json::to_value(overseer),
            Self::Colony(colony) => serde_json::to_value(ColonyState {
                colony: colony.colony.clone(),
                tree: colony.tree.as_ref().map(TaskNode::encode),
            }),
        };
        encoded.unwrap_or_else(|error| {
            error!(type_tag = self.type_tag(), %error, "failed encoding process fields");
            Value::Null
        })
    }

    fn run(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        match self {
            Self::Overseer(_) => {
                run_overseer(ctx);
                Ok(())
            }
            Self::Colony(colony) => {
                run_colony(colony, ctx);
                Ok(())
            }
        }
    }

    fn label(&self) -> Option<String> {
        match self {
            Self::Overseer(_) => None,
            Self::Colony(colony) => Some(colony.colony.to_string()),
        }
    }

    fn unload(&mut self, ctx: &mut UnloadContext) -> Result<(), ProcessError> {
        if let Self::Colony(colony) = self {
            let origin = ctx.id().to_string();
            ctx.submit(RequestBatch::new().log(
                origin,
                LogLevel::Info,
                format!("colony {} released", colony.colony),
            ));
        }
        Ok(())
    }

    fn launcher(&mut self) -> Option<&mut dyn Launcher> {
        match self {
            Self::Overseer(overseer) => Some(overseer),
            Self::Colony(_) => None,
        }
    }
}

fn run_overseer(ctx: &mut ProcessContext<'_>) {
    let world = ctx.world();
    let covered = ctx.child_labels(COLONY);
    for name in world.colonies.keys() {
        if covered.iter().any(|label| label == name.as_str()) {
            continue;
        }
        info!(colony = %name, "colony uncovered, launching its process");
        ctx.launch(COLONY, json!({ "colony": name }));
    }
}

fn run_colony(colony: &mut ColonyProcess, ctx: &mut ProcessContext<'_>) {
    let world = ctx.world();
    if world.colony(&colony.colony).is_none() {
        info!(colony = %colony.colony, "colony lost");
        ctx.exit();
        return;
    }

    let tick = ctx.tick();
    let tree = colony.tree.get_or_insert_with(|| {
        TaskNode::new(
            TaskIdentifier::derive("upkeep", &colony.colony),
            tick,
            ColonyTask::upkeep(),
        )
    });
    match run_root(tree, TaskScope::new(world, &colony.colony)) {
        TaskStatus::InProgress(batch) => ctx.submit(batch),
        TaskStatus::Finished => {
            debug!(colony = %colony.colony, "colony tree finished, restarting");
            colony.tree = None;
        }
        TaskStatus::Failed(batch) => {
            debug!(colony = %colony.colony, "colony tree failed, restarting");
            ctx.submit(batch);
            colony.tree = None;
        }
    }
}

/// Decoders and constructors for both process kinds. Colony state embeds a
/// task tree, rebuilt with `tasks` against the same world.
pub fn registry(tasks: Arc<TypeRegistry<ColonyTask>>) -> KernelResult<TypeRegistry<HiveProcess>> {
    TypeRegistry::new()
        .with_launchable(
            OVERSEER,
            |fields, _| decode_fields(OVERSEER, fields).map(HiveProcess::Overseer),
            |arguments| {
                Overseer::deserialize(arguments)
                    .map(HiveProcess::Overseer)
                    .map_err(|error| error.to_string())
            },
        )?
        .with_launchable(
            COLONY,
            move |fields, world| {
                let state: ColonyState = decode_fields(COLONY, fields)?;
                let tree = state
                    .tree
                    .and_then(|blob| TaskNode::decode(&blob, &tasks, world));
                Ok(HiveProcess::Colony(ColonyProcess {
                    colony: state.colony,
                    tree,
                }))
            },
            |arguments| {
                ColonyArgs::deserialize(arguments)
                    .map(|args| {
                        HiveProcess::Colony(ColonyProcess {
                            colony: args.colony,
                            tree: None,
                        })
                    })
                    .map_err(|error| error.to_string())
            },
        )
}

/// Root may launch only the overseer, which boots an empty forest.
pub fn default_config() -> KernelConfig {
    KernelConfig::default()
        .launchable(OVERSEER)
        .boot(LaunchMessage::at_root(OVERSEER, json!({})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks;
    use crate::world::synthetic;
    use hive_kernel::{Kernel, KernelBuilder};
    use hive_protocol::{ProcessId, WorldSnapshot};

    fn kernel() -> anyhow::Result<Kernel<HiveProcess>> {
        let tasks = Arc::new(tasks::registry()?);
        Ok(KernelBuilder::new(registry(tasks)?)
            .config(default_config())
            .build())
    }

    #[tokio::test]
    async fn overseer_launches_one_process_per_colony() -> anyhow::Result<()> {
        let kernel = kernel()?;
        let first = kernel.tick(&synthetic(1)).await?;
        assert!(first.booted);
        assert_eq!(first.launched, [ProcessId::new(1), ProcessId::new(2), ProcessId::new(3)]);

        let second = kernel.tick(&synthetic(2)).await?;
        assert!(second.launched.is_empty());
        assert_eq!(second.processes, 3);

        let tree = kernel.tree(&synthetic(3)).await?;
        let colonies: Vec<_> = tree
            .iter()
            .filter(|info| info.type_tag == COLONY)
            .map(|info| info.depth)
            .collect();
        assert_eq!(colonies, [1, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn colony_trees_survive_checkpoints_and_produce_requests() -> anyhow::Result<()> {
        let kernel = kernel()?;
        for tick in 1..=2 {
            kernel.tick(&synthetic(tick)).await?;
        }
        let report = kernel.tick(&synthetic(3)).await?;

        assert_eq!(report.requests.assignments.len(), 2);
        assert!(
            report
                .requests
                .assignments
                .iter()
                .all(|assignment| assignment.agent.as_str() == "c-1")
        );
        assert_eq!(report.requests.spawns.len(), 1);
        assert_eq!(report.requests.spawns[0].colony, ColonyName::from("W2N3"));
        assert_eq!(report.failed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn lost_colony_exits_and_is_released() -> anyhow::Result<()> {
        let kernel = kernel()?;
        kernel.tick(&synthetic(1)).await?;

        let mut world: WorldSnapshot = synthetic(2);
        world.colonies.shift_remove(&ColonyName::from("W2N3"));
        let report = kernel.tick(&world).await?;

        assert_eq!(report.killed, [ProcessId::new(3)]);
        assert_eq!(report.processes, 2);
        assert!(
            report
                .requests
                .logs
                .iter()
                .any(|entry| entry.message == "colony W2N3 released")
        );
        Ok(())
    }

    #[tokio::test]
    async fn killed_colony_process_is_relaunched() -> anyhow::Result<()> {
        let kernel = kernel()?;
        kernel.tick(&synthetic(1)).await?;

        kernel.kill(ProcessId::new(3));
        let report = kernel.tick(&synthetic(2)).await?;
        assert_eq!(report.killed, [ProcessId::new(3)]);
        assert_eq!(report.launched, [ProcessId::new(4)]);
        assert_eq!(report.processes, 3);

        let report = kernel.tick(&synthetic(3)).await?;
        assert!(report.launched.is_empty());
        let colonies: Vec<_> = kernel
            .tree(&synthetic(4))
            .await?
            .into_iter()
            .filter(|info| info.type_tag == COLONY)
            .map(|info| info.id)
            .collect();
        assert_eq!(colonies, [ProcessId::new(2), ProcessId::new(4)]);
        Ok(())
    }

    #[tokio::test]
    async fn overseer_refuses_anything_but_colonies() -> anyhow::Result<()> {
        let kernel = kernel()?;
        kernel.tick(&synthetic(1)).await?;

        kernel.launch(LaunchMessage::new(ProcessId::new(1), "harvest", json!({})));
        kernel.launch(LaunchMessage::new(ProcessId::new(1), COLONY, json!({ "name": 4 })));
        let report = kernel.tick(&synthetic(2)).await?;

        assert_eq!(
            report.rejected[0],
            LaunchRejection::NotLaunchable {
                type_tag: "harvest".to_owned()
            }
        );
        assert!(matches!(
            report.rejected[1],
            LaunchRejection::InvalidArguments { .. }
        ));
        assert_eq!(report.processes, 3);
        Ok(())
    }
}
