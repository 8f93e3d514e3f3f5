//! Colony task kinds run by the demo daemon.

use hive_protocol::{
    AssignmentRequest, DeviceRequest, KernelResult, LogLevel, ObjectId, ObjectKind, RequestBatch,
    SpawnRequest, TaskError, TaskIdentifier,
};
use hive_registry::{TypeRegistry, decode_fields};
use hive_tasks::{TaskContext, TaskLogic, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

/// Ticks a harvest task waits after asking for a creep.
pub const RESPAWN_WAIT: u64 = 25;

pub const BUILD_COMPLETE: &str = "build.complete";

#[derive(Debug, Clone, PartialEq)]
pub enum ColonyTask {
    Upkeep(Upkeep),
    Harvest(Harvest),
    Build(Build),
}

/// Root of every colony tree. Keeps one harvest task per source and one
/// build task per construction site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Upkeep {
    #[serde(default)]
    pub cycles: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Harvest {
    pub source: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub site: ObjectId,
    #[serde(default)]
    pub announced: bool,
}

impl ColonyTask {
    pub fn upkeep() -> Self {
        Self::Upkeep(Upkeep::default())
    }
}

fn is_idle(attributes: &Value) -> bool {
    attributes
        .get("idle")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl TaskLogic for ColonyTask {
    fn type_tag(&self) -> &'static str {
        match self {
            Self::Upkeep(_) => "upkeep",
            Self::Harvest(_) => "harvest",
            Self::Build(_) => "build",
        }
    }

    fn encode(&self) -> Value {
        let encoded = match self {
            Self::Upkeep(upkeep) => serde_json::to_value(upkeep),
            Self::Harvest(harvest) => serde_json::to_value(harvest),
            Self::Build(build) => serde_json::to_value(build),
        };
        encoded.unwrap_or_else(|error| {
            error!(type_tag = self.type_tag(), %error, "failed encoding task fields");
            Value::Null
        })
    }

    fn run(
        &mut self,
        ctx: &mut TaskContext<'_, Self>,
        requests: RequestBatch,
    ) -> Result<TaskStatus, TaskError> {
        match self {
            Self::Upkeep(upkeep) => run_upkeep(upkeep, ctx, requests),
            Self::Harvest(harvest) => Ok(run_harvest(harvest, ctx, requests)),
            Self::Build(build) => Ok(run_build(build, ctx, requests)),
        }
    }
}

fn run_upkeep(
    upkeep: &mut Upkeep,
    ctx: &mut TaskContext<'_, ColonyTask>,
    mut requests: RequestBatch,
) -> Result<TaskStatus, TaskError> {
    upkeep.cycles += 1;
    let world = ctx.world();
    let colony = ctx.colony();

    for source in world.objects_in(colony, ObjectKind::Source) {
        let identifier = TaskIdentifier::derive_for("harvest", colony, source.id.as_str());
        ctx.ensure(identifier, || {
            ColonyTask::Harvest(Harvest {
                source: source.id.clone(),
                miner: None,
            })
        });
    }
    for site in world.objects_in(colony, ObjectKind::Site) {
        let identifier = TaskIdentifier::derive_for("build", colony, site.id.as_str());
        ctx.ensure(identifier, || {
            ColonyTask::Build(Build {
                site: site.id.clone(),
                announced: false,
            })
        });
    }

    let origin = ctx.origin();
    let completed: Vec<String> = requests
        .events_on(BUILD_COMPLETE)
        .filter_map(|event| event.payload.get("site").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    for site in completed {
        requests = requests.log(origin.clone(), LogLevel::Info, format!("site {site} complete"));
    }
    Ok(TaskStatus::InProgress(requests))
}

fn run_harvest(
    harvest: &mut Harvest,
    ctx: &mut TaskContext<'_, ColonyTask>,
    requests: RequestBatch,
) -> TaskStatus {
    let world = ctx.world();
    let origin = ctx.origin();
    let tick = ctx.tick();

    if let Some(miner) = &harvest.miner
        && world.object(miner).is_none()
    {
        harvest.miner = None;
    }
    if harvest.miner.is_none() {
        harvest.miner = world
            .objects_in(ctx.colony(), ObjectKind::Creep)
            .find(|creep| is_idle(&creep.attributes))
            .map(|creep| creep.id.clone());
    }

    let batch = match &harvest.miner {
        Some(miner) => requests.assignment(AssignmentRequest {
            origin,
            agent: miner.clone(),
            target: harvest.source.clone(),
            role: "harvester".to_owned(),
        }),
        None => {
            ctx.pause_until(tick + RESPAWN_WAIT);
            requests.spawn(SpawnRequest {
                origin,
                colony: ctx.colony().clone(),
                priority: 10,
                cost: 200,
                body: vec!["work".into(), "carry".into(), "move".into()],
                needed_by: tick + RESPAWN_WAIT,
            })
        }
    };
    TaskStatus::InProgress(batch)
}

fn run_build(build: &mut Build, ctx: &mut TaskContext<'_, ColonyTask>, requests: RequestBatch) -> TaskStatus {
    let Some(site) = ctx.world().object(&build.site) else {
        return TaskStatus::Finished;
    };
    let origin = ctx.origin();
    let progress = site.attribute_u64("progress").unwrap_or(0);
    let total = site.attribute_u64("total").unwrap_or(1);

    if progress >= total {
        if build.announced {
            return TaskStatus::Finished;
        }
        build.announced = true;
        return TaskStatus::InProgress(requests.event(
            origin,
            BUILD_COMPLETE,
            json!({ "site": build.site }),
        ));
    }
    TaskStatus::InProgress(requests.device(DeviceRequest {
        origin,
        device: build.site.clone(),
        action: "build".to_owned(),
        target: None,
        payload: json!({ "remaining": total - progress }),
    }))
}

/// Decoders for every colony task kind.
pub fn registry() -> KernelResult<TypeRegistry<ColonyTask>> {
    TypeRegistry::new()
        .with("upkeep", |fields, _| {
            decode_fields("upkeep", fields).map(ColonyTask::Upkeep)
        })?
        .with("harvest", |fields, world| {
            let harvest: Harvest = decode_fields("harvest", fields)?;
            world.require("harvest", &harvest.source)?;
            Ok(ColonyTask::Harvest(harvest))
        })?
        .with("build", |fields, _| {
            decode_fields("build", fields).map(ColonyTask::Build)
        })
}
