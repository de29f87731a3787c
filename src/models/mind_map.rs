use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

/// One node of a mind-map tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub id: String,
    pub content: String,
    /// 0 for the root, parents always one less than their children.
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children_ids: Vec<String>,
    /// Message ids this point was distilled from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_references: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl MindMapNode {
    pub fn new(id: impl Into<String>, content: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            level,
            parent_id: None,
            children_ids: Vec::new(),
            message_references: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A tree of discussion points distilled from a meeting. Replace-only: a new
/// map supersedes the previous one and bumps `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindMap {
    pub id: String,
    pub meeting_id: String,
    /// The root node; also present in `nodes` under its own id.
    pub root_node: MindMapNode,
    pub nodes: HashMap<String, MindMapNode>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl MindMap {
    /// Check the tree invariants: exactly one root (level 0, no parent), every
    /// `children_ids` entry resolves to a node whose `parent_id` points back,
    /// and every node is reachable from the root exactly once.
    pub fn validate_tree(&self) -> CoreResult<()> {
        let root = self
            .nodes
            .get(&self.root_node.id)
            .ok_or_else(|| CoreError::validation("mind_map", "root node missing from node map"))?;
        if root.level != 0 || root.parent_id.is_some() {
            return Err(CoreError::validation(
                "mind_map",
                "root node must have level 0 and no parent",
            ));
        }

        let root_count = self
            .nodes
            .values()
            .filter(|n| n.level == 0 && n.parent_id.is_none())
            .count();
        if root_count != 1 {
            return Err(CoreError::validation(
                "mind_map",
                format!("expected exactly one root node, found {}", root_count),
            ));
        }

        // Walk from the root; verify parent/child agreement and full coverage.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = vec![self.root_node.id.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(CoreError::validation(
                    "mind_map",
                    format!("node {} reachable more than once", id),
                ));
            }
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| CoreError::validation("mind_map", format!("missing node {}", id)))?;
            for child_id in &node.children_ids {
                let child = self.nodes.get(child_id).ok_or_else(|| {
                    CoreError::validation("mind_map", format!("missing child node {}", child_id))
                })?;
                if child.parent_id.as_deref() != Some(id) {
                    return Err(CoreError::validation(
                        "mind_map",
                        format!("node {} does not point back to parent {}", child_id, id),
                    ));
                }
                stack.push(child_id);
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(CoreError::validation(
                "mind_map",
                "node map contains entries unreachable from the root",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_map() -> MindMap {
        let mut root = MindMapNode::new("root", "Topic", 0);
        let mut child = MindMapNode::new("n1", "Point", 1);
        child.parent_id = Some("root".to_string());
        root.children_ids.push("n1".to_string());

        let mut nodes = HashMap::new();
        nodes.insert(root.id.clone(), root.clone());
        nodes.insert(child.id.clone(), child);
        MindMap {
            id: "mm1".to_string(),
            meeting_id: "mtg1".to_string(),
            root_node: root,
            nodes,
            version: 1,
            created_at: Utc::now(),
            created_by: "user".to_string(),
        }
    }

    #[test]
    fn test_valid_tree_passes() {
        assert!(two_level_map().validate_tree().is_ok());
    }

    #[test]
    fn test_dangling_child_rejected() {
        let mut map = two_level_map();
        map.nodes
            .get_mut("root")
            .unwrap()
            .children_ids
            .push("ghost".to_string());
        assert!(map.validate_tree().is_err());
    }

    #[test]
    fn test_unreachable_node_rejected() {
        let mut map = two_level_map();
        let mut orphan = MindMapNode::new("orphan", "Lost", 2);
        orphan.parent_id = Some("nowhere".to_string());
        map.nodes.insert(orphan.id.clone(), orphan);
        assert!(map.validate_tree().is_err());
    }

    #[test]
    fn test_parent_mismatch_rejected() {
        let mut map = two_level_map();
        map.nodes.get_mut("n1").unwrap().parent_id = Some("n1".to_string());
        assert!(map.validate_tree().is_err());
    }

    #[test]
    fn test_round_trip() {
        let map = two_level_map();
        let json = serde_json::to_string(&map).unwrap();
        let back: MindMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
