use hive_protocol::LaunchMessage;
use serde::{Deserialize, Serialize};

/// Settings for one kernel instance. Every field has a default, so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Store key the forest is saved under.
    pub checkpoint_key: String,
    /// Type tags the root may launch.
    pub root_launch_table: Vec<String>,
    /// Launched in order whenever the decoded forest is empty.
    pub boot: Vec<LaunchMessage>,
    /// Check the blob digest against its manifest on load.
    pub verify_checkpoints: bool,
    /// Cap on process runs per tick; the rest of the walk is deferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runs_per_tick: Option<usize>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            checkpoint_key: "forest".to_owned(),
            root_launch_table: Vec::new(),
            boot: Vec::new(),
            verify_checkpoints: true,
            max_runs_per_tick: None,
        }
    }
}

impl KernelConfig {
    pub fn checkpoint_key(mut self, key: impl Into<String>) -> Self {
        self.checkpoint_key = key.into();
        self
    }

    pub fn launchable(mut self, type_tag: impl Into<String>) -> Self {
        self.root_launch_table.push(type_tag.into());
        self
    }

    pub fn boot(mut self, message: LaunchMessage) -> Self {
        self.boot.push(message);
        self
    }

    pub fn verify_checkpoints(mut self, verify: bool) -> Self {
        self.verify_checkpoints = verify;
        self
    }

    pub fn max_runs_per_tick(mut self, limit: usize) -> Self {
        self.max_runs_per_tick = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_protocol::ParentRef;
    use serde_json::json;

    #[test]
    fn partial_config_fills_defaults() {
        let config: KernelConfig = serde_json::from_value(json!({
            "root_launch_table": ["supervisor"],
            "boot": [{ "target_parent": "root", "type_tag": "supervisor" }]
        }))
        .unwrap();
        assert_eq!(config.checkpoint_key, "forest");
        assert!(config.verify_checkpoints);
        assert_eq!(config.boot.len(), 1);
        assert_eq!(config.boot[0].target_parent, ParentRef::Root);
        assert_eq!(config.max_runs_per_tick, None);
    }

    #[test]
    fn builder_methods_compose() {
        let config = KernelConfig::default()
            .checkpoint_key("alpha")
            .launchable("supervisor")
            .boot(LaunchMessage::at_root("supervisor", json!({})))
            .verify_checkpoints(false)
            .max_runs_per_tick(50);
        assert_eq!(config.checkpoint_key, "alpha");
        assert_eq!(config.root_launch_table, ["supervisor"]);
        assert!(!config.verify_checkpoints);
        assert_eq!(config.max_runs_per_tick, Some(50));
    }
}
