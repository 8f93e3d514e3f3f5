//! Read-only view of the world for one tick.
//!
//! Handed to every run and every decode. Nodes must not keep references to
//! it across ticks; only ids survive the tick boundary.

use crate::error::DecodeError;
use crate::ids::{ColonyName, ObjectId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Creep,
    Spawn,
    Structure,
    Source,
    Controller,
    Site,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    pub id: ObjectId,
    pub kind: ObjectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colony: Option<ColonyName>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub attributes: Value,
}

impl WorldObject {
    pub fn new(id: impl Into<ObjectId>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            colony: None,
            attributes: Value::Null,
        }
    }

    pub fn in_colony(mut self, colony: impl Into<ColonyName>) -> Self {
        self.colony = Some(colony.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute_u64(&self, key: &str) -> Option<u64> {
        self.attributes.get(key).and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Colony {
    pub name: ColonyName,
    #[serde(default)]
    pub energy_available: u32,
    #[serde(default)]
    pub energy_capacity: u32,
    #[serde(default)]
    pub level: u8,
}

impl Colony {
    pub fn new(name: impl Into<ColonyName>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Snapshot of owned entities at one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    #[serde(default)]
    pub colonies: IndexMap<ColonyName, Colony>,
    #[serde(default)]
    pub objects: IndexMap<ObjectId, WorldObject>,
}

impl WorldSnapshot {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn with_colony(mut self, colony: Colony) -> Self {
        self.colonies.insert(colony.name.clone(), colony);
        self
    }

    pub fn with_object(mut self, object: WorldObject) -> Self {
        self.objects.insert(object.id.clone(), object);
        self
    }

    /// Same world, one tick later.
    pub fn advanced(&self) -> Self {
        Self {
            tick: self.tick + 1,
            ..self.clone()
        }
    }

    pub fn colony(&self, name: &ColonyName) -> Option<&Colony> {
        self.colonies.get(name)
    }

    pub fn object(&self, id: &ObjectId) -> Option<&WorldObject> {
        self.objects.get(id)
    }

    /// Resolve an id embedded in a blob. A missing object is reported as
    /// [`DecodeError::Dangling`] on behalf of `tag`.
    pub fn require(&self, tag: &str, id: &ObjectId) -> Result<&WorldObject, DecodeError> {
        self.object(id).ok_or_else(|| DecodeError::Dangling {
            tag: tag.to_owned(),
            object: id.clone(),
        })
    }

    /// Objects of `kind` that belong to `colony`, in snapshot order.
    pub fn objects_in<'a>(
        &'a self,
        colony: &'a ColonyName,
        kind: ObjectKind,
    ) -> impl Iterator<Item = &'a WorldObject> + 'a {
        self.objects
            .values()
            .filter(move |object| object.kind == kind && object.colony.as_ref() == Some(colony))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> WorldSnapshot {
        WorldSnapshot::new(12)
            .with_colony(Colony::new("W1N1"))
            .with_object(WorldObject::new("src-a", ObjectKind::Source).in_colony("W1N1"))
            .with_object(WorldObject::new("src-b", ObjectKind::Source).in_colony("W2N2"))
            .with_object(WorldObject::new("spawn-1", ObjectKind::Spawn).in_colony("W1N1"))
    }

    #[test]
    fn require_reports_dangling_ids() {
        let world = world();
        assert!(world.require("harvest", &ObjectId::from("src-a")).is_ok());
        let error = world
            .require("harvest", &ObjectId::from("gone"))
            .unwrap_err();
        assert!(matches!(error, DecodeError::Dangling { .. }));
    }

    #[test]
    fn objects_in_filters_by_colony_and_kind() {
        let world = world();
        let colony = ColonyName::from("W1N1");
        let ids: Vec<_> = world
            .objects_in(&colony, ObjectKind::Source)
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(ids, ["src-a"]);
    }

    #[test]
    fn snapshot_deserializes_from_host_json() {
        let raw = serde_json::json!({
            "tick": 3,
            "colonies": {"W1N1": {"name": "W1N1", "energy_available": 300}},
            "objects": {"c1": {"id": "c1", "kind": "creep", "colony": "W1N1"}}
        });
        let world: WorldSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(world.tick, 3);
        assert_eq!(
            world.colony(&ColonyName::from("W1N1")).unwrap().energy_available,
            300
        );
        assert_eq!(world.object(&ObjectId::from("c1")).unwrap().kind, ObjectKind::Creep);
    }

    #[test]
    fn advanced_bumps_only_the_tick() {
        let world = world();
        let next = world.advanced();
        assert_eq!(next.tick, 13);
        assert_eq!(next.objects, world.objects);
    }
}
