//! World snapshots for the daemon: loaded from JSON or generated.

use std::path::Path;

use anyhow::{Context, Result};
use hive_protocol::{Colony, ObjectKind, WorldObject, WorldSnapshot};
use serde_json::json;
use tokio::fs;

/// Tick at which the W1N1 construction site is finished and removed.
const SITE_DONE: u64 = 3;
/// Tick from which W2N3 has a creep of its own.
const W2N3_CREEP_FROM: u64 = 30;

pub async fn load(path: &Path) -> Result<WorldSnapshot> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed reading world snapshot {path:?}"))?;
    serde_json::from_str(&text).with_context(|| format!("failed parsing world snapshot {path:?}"))
}

/// Two colonies that change a little every tick, enough to exercise task
/// creation, completion and decode drops without a real game.
pub fn synthetic(tick: u64) -> WorldSnapshot {
    let mut world = WorldSnapshot::new(tick)
        .with_colony(Colony {
            energy_available: 300,
            energy_capacity: 550,
            level: 2,
            ..Colony::new("W1N1")
        })
        .with_colony(Colony {
            energy_available: 200,
            energy_capacity: 300,
            level: 1,
            ..Colony::new("W2N3")
        })
        .with_object(WorldObject::new("spawn-1", ObjectKind::Spawn).in_colony("W1N1"))
        .with_object(WorldObject::new("src-a", ObjectKind::Source).in_colony("W1N1"))
        .with_object(WorldObject::new("src-b", ObjectKind::Source).in_colony("W1N1"))
        .with_object(
            WorldObject::new("c-1", ObjectKind::Creep)
                .in_colony("W1N1")
                .with_attributes(json!({ "idle": true })),
        )
        .with_object(WorldObject::new("src-c", ObjectKind::Source).in_colony("W2N3"));

    if tick <= SITE_DONE {
        world = world.with_object(
            WorldObject::new("site-1", ObjectKind::Site)
                .in_colony("W1N1")
                .with_attributes(json!({ "progress": tick, "total": SITE_DONE })),
        );
    }
    if tick >= W2N3_CREEP_FROM {
        world = world.with_object(
            WorldObject::new("c-9", ObjectKind::Creep)
                .in_colony("W2N3")
                .with_attributes(json!({ "idle": true })),
        );
    }
    world
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_protocol::{ColonyName, ObjectId};

    #[test]
    fn site_lives_until_done() {
        assert!(synthetic(SITE_DONE).object(&ObjectId::from("site-1")).is_some());
        assert!(synthetic(SITE_DONE + 1).object(&ObjectId::from("site-1")).is_none());
    }

    #[test]
    fn second_colony_gets_a_creep_later() {
        let colony = ColonyName::from("W2N3");
        assert_eq!(synthetic(1).objects_in(&colony, ObjectKind::Creep).count(), 0);
        assert_eq!(
            synthetic(W2N3_CREEP_FROM)
                .objects_in(&colony, ObjectKind::Creep)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn snapshot_loads_from_json() -> Result<()> {
        let path = std::env::temp_dir().join(format!("hived-world-{}.json", std::process::id()));
        fs::write(&path, serde_json::to_vec(&synthetic(7))?).await?;
        let world = load(&path).await?;
        assert_eq!(world, synthetic(7));
        let _ = fs::remove_file(path).await;
        Ok(())
    }
}
