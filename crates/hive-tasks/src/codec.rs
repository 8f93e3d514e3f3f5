//! Checkpoint encoding of task trees.
//!
//! Decoding is isolated per subtree: a node that cannot be rebuilt is
//! dropped with one log line, its siblings and ancestors survive unless an
//! ancestor declares it cannot live without that child.

use hive_protocol::{DecodeError, TaskBlob, TaskIdentifier, WorldSnapshot};
use hive_registry::TypeRegistry;
use tracing::{error, warn};

use crate::node::{TaskLogic, TaskNode};

/// A child that failed to decode, offered to its parent's
/// [`TaskLogic::keep_without_child`].
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedChild {
    pub identifier: TaskIdentifier,
    pub type_tag: String,
    pub reason: DecodeError,
}

impl<K: TaskLogic> TaskNode<K> {
    /// Encode this node and its whole subtree, children in run order.
    pub fn encode(&self) -> TaskBlob {
        TaskBlob {
            type_tag: self.type_tag().to_owned(),
            identifier: self.identifier.to_string(),
            start_time: self.start_time,
            paused_until: self.paused_until,
            fields: self.logic.encode(),
            children: self.children.iter().map(TaskNode::encode).collect(),
        }
    }

    /// Rebuild a subtree. Children that fail are dropped and logged here;
    /// the failure of `blob` itself is returned without a log line.
    pub fn try_decode(
        blob: &TaskBlob,
        registry: &TypeRegistry<K>,
        world: &WorldSnapshot,
    ) -> Result<Self, DecodeError> {
        let logic = registry.decode(&blob.type_tag, &blob.fields, world)?;
        let mut node = TaskNode {
            identifier: TaskIdentifier::from(blob.identifier.as_str()),
            start_time: blob.start_time,
            paused_until: blob.paused_until,
            logic,
            children: Vec::with_capacity(blob.children.len()),
        };

        for child in &blob.children {
            let identifier = TaskIdentifier::from(child.identifier.as_str());
            match Self::try_decode(child, registry, world) {
                Ok(decoded) if node.has_child(&identifier) => {
                    error!(
                        parent = %node.identifier,
                        child = %identifier,
                        type_tag = %decoded.type_tag(),
                        "duplicate child identifier in checkpoint, keeping the first"
                    );
                }
                Ok(decoded) => node.children.push(decoded),
                Err(reason) => {
                    warn!(
                        parent = %node.identifier,
                        task = %identifier,
                        type_tag = %child.type_tag,
                        %reason,
                        "task dropped during decode"
                    );
                    let dropped = DroppedChild {
                        identifier,
                        type_tag: child.type_tag.clone(),
                        reason,
                    };
                    if !node.logic.keep_without_child(&dropped) {
                        return Err(DecodeError::MissingChild {
                            tag: blob.type_tag.clone(),
                            child: dropped.identifier.to_string(),
                        });
                    }
                }
            }
        }
        Ok(node)
    }

    /// Rebuild a colony root. A failure is logged once and yields `None`.
    pub fn decode(
        blob: &TaskBlob,
        registry: &TypeRegistry<K>,
        world: &WorldSnapshot,
    ) -> Option<Self> {
        match Self::try_decode(blob, registry, world) {
            Ok(node) => Some(node),
            Err(reason) => {
                warn!(
                    task = %blob.identifier,
                    type_tag = %blob.type_tag,
                    %reason,
                    "task dropped during decode"
                );
                None
            }
        }
    }
}
