//! Checkpoint blob shapes.
//!
//! Every node is stored as `{t, f, c}` (type tag, own fields, children) plus
//! a few header fields. Keys are single letters to keep the persisted blob
//! small. Children are always kept in run order.

use crate::ids::ProcessId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBlob {
    #[serde(rename = "t")]
    pub type_tag: String,
    #[serde(rename = "i")]
    pub identifier: String,
    #[serde(rename = "s", default)]
    pub start_time: u64,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<u64>,
    #[serde(rename = "f", default, skip_serializing_if = "Value::is_null")]
    pub fields: Value,
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskBlob>,
}

/// One root-level or nested process entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessBlob {
    pub id: ProcessId,
    pub running: bool,
    #[serde(rename = "s", default)]
    pub started_at: u64,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<u64>,
    pub state: ProcessState,
}

/// Type-tagged process state with nested children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    #[serde(rename = "t")]
    pub type_tag: String,
    #[serde(rename = "f", default, skip_serializing_if = "Value::is_null")]
    pub fields: Value,
    #[serde(rename = "c", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProcessBlob>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_blob_uses_short_keys_and_omits_defaults() {
        let blob = TaskBlob {
            type_tag: "upkeep".into(),
            identifier: "upkeep@W1N1".into(),
            start_time: 4,
            paused_until: None,
            fields: Value::Null,
            children: vec![],
        };
        assert_eq!(
            serde_json::to_value(&blob).unwrap(),
            json!({"t": "upkeep", "i": "upkeep@W1N1", "s": 4})
        );
    }

    #[test]
    fn process_blob_nests_children_inside_state() {
        let raw = json!({
            "id": 1,
            "running": true,
            "state": {
                "t": "supervisor",
                "c": [{"id": 2, "running": false, "p": 0, "state": {"t": "colony", "f": {"colony": "W1N1"}}}]
            }
        });
        let blob: ProcessBlob = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(blob.state.children.len(), 1);
        let child = &blob.state.children[0];
        assert_eq!(child.id, ProcessId::new(2));
        assert!(!child.running);
        assert_eq!(child.paused_until, Some(0));
        assert_eq!(serde_json::to_value(&blob).unwrap(), json!({
            "id": 1,
            "running": true,
            "s": 0,
            "state": {
                "t": "supervisor",
                "c": [{"id": 2, "running": false, "s": 0, "p": 0, "state": {"t": "colony", "f": {"colony": "W1N1"}}}]
            }
        }));
    }
}
