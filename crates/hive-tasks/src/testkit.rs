//! Drill task kinds shared by the runner and codec tests.

use hive_protocol::{
    ColonyName, LogLevel, ObjectId, ObjectKind, RequestBatch, SpawnRequest, TaskError,
    TaskIdentifier, WorldObject, WorldSnapshot,
};
use hive_registry::{TypeRegistry, decode_fields};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::DroppedChild;
use crate::context::TaskContext;
use crate::node::{TaskLogic, TaskNode, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relay {
    pub last_seen: usize,
    pub children_seen: usize,
    #[serde(default)]
    pub needs_children: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Countdown {
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flaky {
    pub panic_on: u64,
    pub runs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Starter {
    pub pending: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mine {
    pub source: ObjectId,
}

/// Cancels one child, pauses another, starts a new one and pauses itself,
/// then fails (or panics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meddle {
    pub cancel: String,
    pub pause: String,
    pub panics: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Drill {
    Relay(Relay),
    Countdown(Countdown),
    Flaky(Flaky),
    Starter(Starter),
    Mine(Mine),
    Meddle(Meddle),
    Broken,
    Erroring,
}

impl Drill {
    pub fn countdown(remaining: u32) -> Self {
        Self::Countdown(Countdown { remaining })
    }

    pub fn flaky(panic_on: u64) -> Self {
        Self::Flaky(Flaky { panic_on, runs: 0 })
    }

    pub fn starter(pending: Vec<u32>) -> Self {
        Self::Starter(Starter { pending })
    }

    pub fn meddle(cancel: &str, pause: &str, panics: bool) -> Self {
        Self::Meddle(Meddle {
            cancel: cancel.to_owned(),
            pause: pause.to_owned(),
            panics,
        })
    }

    pub fn broken() -> Self {
        Self::Broken
    }

    pub fn erroring() -> Self {
        Self::Erroring
    }

    pub fn as_relay(&self) -> Option<&Relay> {
        match self {
            Self::Relay(relay) => Some(relay),
            _ => None,
        }
    }

    pub fn as_countdown(&self) -> Option<&Countdown> {
        match self {
            Self::Countdown(countdown) => Some(countdown),
            _ => None,
        }
    }

    pub fn as_flaky(&self) -> Option<&Flaky> {
        match self {
            Self::Flaky(flaky) => Some(flaky),
            _ => None,
        }
    }
}

impl TaskLogic for Drill {
    fn type_tag(&self) -> &'static str {
        match self {
            Self::Relay(_) => "relay",
            Self::Countdown(_) => "countdown",
            Self::Flaky(_) => "flaky",
            Self::Starter(_) => "starter",
            Self::Mine(_) => "mine",
            Self::Meddle(_) => "meddle",
            Self::Broken => "broken",
            Self::Erroring => "erroring",
        }
    }

    fn encode(&self) -> Value {
        match self {
            Self::Relay(relay) => serde_json::to_value(relay).unwrap(),
            Self::Countdown(countdown) => serde_json::to_value(countdown).unwrap(),
            Self::Flaky(flaky) => serde_json::to_value(flaky).unwrap(),
            Self::Starter(starter) => serde_json::to_value(starter).unwrap(),
            Self::Mine(mine) => serde_json::to_value(mine).unwrap(),
            Self::Meddle(meddle) => serde_json::to_value(meddle).unwrap(),
            Self::Broken | Self::Erroring => Value::Null,
        }
    }

    fn run(
        &mut self,
        ctx: &mut TaskContext<'_, Self>,
        requests: RequestBatch,
    ) -> Result<TaskStatus, TaskError> {
        let origin = ctx.origin();
        match self {
            Self::Relay(relay) => {
                relay.last_seen = requests.len();
                relay.children_seen = ctx.children().len();
                Ok(TaskStatus::InProgress(requests.log(
                    origin,
                    LogLevel::Debug,
                    "relayed",
                )))
            }
            Self::Countdown(countdown) => {
                if countdown.remaining == 0 {
                    return Ok(TaskStatus::Finished);
                }
                let spawn = SpawnRequest {
                    origin,
                    colony: ctx.colony().clone(),
                    priority: countdown.remaining,
                    cost: 100,
                    body: vec!["work".into(), "move".into()],
                    needed_by: ctx.tick() + 10,
                };
                countdown.remaining -= 1;
                Ok(TaskStatus::InProgress(requests.spawn(spawn)))
            }
            Self::Flaky(flaky) => {
                if ctx.tick() == flaky.panic_on {
                    panic!("flaky task tripped on tick {}", flaky.panic_on);
                }
                flaky.runs += 1;
                Ok(TaskStatus::InProgress(requests))
            }
            Self::Starter(starter) => {
                for remaining in std::mem::take(&mut starter.pending) {
                    ctx.start_for(Drill::countdown(remaining), &remaining.to_string())?;
                }
                Ok(TaskStatus::InProgress(requests))
            }
            Self::Mine(mine) => Ok(TaskStatus::InProgress(requests.assignment(
                hive_protocol::AssignmentRequest {
                    origin,
                    agent: ObjectId::from("creep-1"),
                    target: mine.source.clone(),
                    role: "miner".into(),
                },
            ))),
            Self::Meddle(meddle) => {
                ctx.remove_child(&TaskIdentifier::from(meddle.cancel.as_str()));
                ctx.pause_child_until(&TaskIdentifier::from(meddle.pause.as_str()), 99)?;
                ctx.start_for(Drill::countdown(1), "late")?;
                ctx.pause_until(50);
                if meddle.panics {
                    panic!("meddling task tripped");
                }
                Err(TaskError::Logic("meddled and failed".into()))
            }
            Self::Broken => Ok(TaskStatus::Failed(requests.problem(origin, "cannot proceed"))),
            Self::Erroring => Err(TaskError::Logic("logic error".into())),
        }
    }

    fn keep_without_child(&self, _dropped: &DroppedChild) -> bool {
        !matches!(self, Self::Relay(Relay { needs_children: true, .. }))
    }
}

pub fn registry() -> TypeRegistry<Drill> {
    let mut registry = TypeRegistry::new();
    registry
        .register("relay", |fields, _| {
            decode_fields("relay", fields).map(Drill::Relay)
        })
        .unwrap();
    registry
        .register("countdown", |fields, _| {
            decode_fields("countdown", fields).map(Drill::Countdown)
        })
        .unwrap();
    registry
        .register("flaky", |fields, _| decode_fields("flaky", fields).map(Drill::Flaky))
        .unwrap();
    registry
        .register("starter", |fields, _| {
            decode_fields("starter", fields).map(Drill::Starter)
        })
        .unwrap();
    registry
        .register("mine", |fields, world| {
            let mine: Mine = decode_fields("mine", fields)?;
            world.require("mine", &mine.source)?;
            Ok(Drill::Mine(mine))
        })
        .unwrap();
    registry
        .register("meddle", |fields, _| {
            decode_fields("meddle", fields).map(Drill::Meddle)
        })
        .unwrap();
    registry.register("broken", |_, _| Ok(Drill::Broken)).unwrap();
    registry.register("erroring", |_, _| Ok(Drill::Erroring)).unwrap();
    registry
}

pub fn colony() -> ColonyName {
    ColonyName::from("W1N1")
}

pub fn world(tick: u64) -> WorldSnapshot {
    WorldSnapshot::new(tick)
        .with_object(WorldObject::new("src-1", ObjectKind::Source).in_colony("W1N1"))
        .with_object(WorldObject::new("creep-1", ObjectKind::Creep).in_colony("W1N1"))
}

pub fn node(identifier: &str, drill: Drill) -> TaskNode<Drill> {
    TaskNode::new(TaskIdentifier::from(identifier), 0, drill)
}

pub fn relay(identifier: &str, children: Vec<TaskNode<Drill>>) -> TaskNode<Drill> {
    children
        .into_iter()
        .try_fold(node(identifier, Drill::Relay(Relay::default())), TaskNode::with_child)
        .unwrap()
}

pub fn countdown(identifier: &str, remaining: u32) -> TaskNode<Drill> {
    node(identifier, Drill::countdown(remaining))
}

pub fn mine(identifier: &str, source: &str) -> TaskNode<Drill> {
    node(
        identifier,
        Drill::Mine(Mine {
            source: ObjectId::from(source),
        }),
    )
}
