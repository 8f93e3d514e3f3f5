//! Stand-in for the host's world-mutation queue: reports what a tick asked
//! for instead of acting on it.

use hive_kernel::TickReport;
use hive_protocol::{LogLevel, SpawnRequest};
use tracing::{debug, info, warn};

/// Spawn requests in the order a host should serve them: highest priority
/// first, arrival order among equals.
pub fn spawn_order(spawns: &[SpawnRequest]) -> Vec<&SpawnRequest> {
    let mut ordered: Vec<_> = spawns.iter().collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
    ordered
}

pub fn consume(report: &TickReport) {
    let requests = &report.requests;
    for spawn in spawn_order(&requests.spawns) {
        info!(
            origin = %spawn.origin,
            colony = %spawn.colony,
            priority = spawn.priority,
            cost = spawn.cost,
            needed_by = spawn.needed_by,
            "spawn requested"
        );
    }
    for device in &requests.devices {
        info!(origin = %device.origin, device = %device.device, action = %device.action, "device action requested");
    }
    for assignment in &requests.assignments {
        debug!(
            origin = %assignment.origin,
            agent = %assignment.agent,
            target = %assignment.target,
            role = %assignment.role,
            "assignment requested"
        );
    }
    for event in &requests.events {
        debug!(origin = %event.origin, topic = %event.topic, "event raised");
    }
    for problem in &requests.problems {
        warn!(origin = %problem.origin, "{}", problem.message);
    }
    for entry in &requests.logs {
        match entry.level {
            LogLevel::Debug => debug!(origin = %entry.origin, "{}", entry.message),
            LogLevel::Info => info!(origin = %entry.origin, "{}", entry.message),
            LogLevel::Warn => warn!(origin = %entry.origin, "{}", entry.message),
        }
    }
    for rejection in &report.rejected {
        warn!(%rejection, "launch rejected");
    }
    for error in &report.errors {
        warn!(%error, "kernel error during tick");
    }
}
