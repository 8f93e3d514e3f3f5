//! Request batches produced by node runs and merged on the way up a tree.
//!
//! Merging is a per-category concatenation that preserves arrival order.
//! Consumers at the top of a tree rely on that order as a tie-break, so no
//! sorting or de-duplication happens here.

use crate::ids::{ColonyName, ObjectId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ask the host to produce a new agent body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub origin: String,
    pub colony: ColonyName,
    pub priority: u32,
    pub cost: u32,
    pub body: Vec<String>,
    /// Tick by which the body should exist.
    pub needed_by: u64,
}

/// Ask a device (structure) to perform an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub origin: String,
    pub device: ObjectId,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// Ask for an agent to be bound to a target for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub origin: String,
    pub agent: ObjectId,
    pub target: ObjectId,
    pub role: String,
}

/// A condition a node cannot resolve on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub origin: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub origin: String,
    pub level: LogLevel,
    pub message: String,
}

/// Typed notification travelling upward, e.g. "body spawned". Replaces
/// stored back-references to ancestors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub origin: String,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// Everything one run produced for its parent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestBatch {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub spawns: Vec<SpawnRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<AssignmentRequest>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<Problem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

impl RequestBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate batches category by category, in the order given.
    pub fn merge(batches: impl IntoIterator<Item = RequestBatch>) -> Self {
        let mut merged = Self::default();
        for batch in batches {
            merged.absorb(batch);
        }
        merged
    }

    /// Append `other` after the requests already held.
    pub fn absorb(&mut self, other: RequestBatch) {
        let RequestBatch {
            spawns,
            devices,
            assignments,
            problems,
            logs,
            events,
        } = other;
        self.spawns.extend(spawns);
        self.devices.extend(devices);
        self.assignments.extend(assignments);
        self.problems.extend(problems);
        self.logs.extend(logs);
        self.events.extend(events);
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.spawns.len()
            + self.devices.len()
            + self.assignments.len()
            + self.problems.len()
            + self.logs.len()
            + self.events.len()
    }

    pub fn spawn(mut self, request: SpawnRequest) -> Self {
        self.spawns.push(request);
        self
    }

    pub fn device(mut self, request: DeviceRequest) -> Self {
        self.devices.push(request);
        self
    }

    pub fn assignment(mut self, request: AssignmentRequest) -> Self {
        self.assignments.push(request);
        self
    }

    pub fn problem(mut self, origin: impl Into<String>, message: impl Into<String>) -> Self {
        self.problems.push(Problem {
            origin: origin.into(),
            message: message.into(),
        });
        self
    }

    pub fn log(
        mut self,
        origin: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        self.logs.push(LogEntry {
            origin: origin.into(),
            level,
            message: message.into(),
        });
        self
    }

    pub fn event(mut self, origin: impl Into<String>, topic: impl Into<String>, payload: Value) -> Self {
        self.events.push(Event {
            origin: origin.into(),
            topic: topic.into(),
            payload,
        });
        self
    }

    /// Events addressed to `topic`, in arrival order.
    pub fn events_on<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |event| event.topic == topic)
    }
}
