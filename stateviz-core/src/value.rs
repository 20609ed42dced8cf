//! State values and the active-id resolver.
//!
//! A [`StateValue`] is the compact, serializable form of a configuration:
//!
//! - `"green"` for a compound machine whose active child is atomic,
//! - `{ "red": "walk" }` for nested compound states,
//! - `{ "bold": {}, "underline": {} }` for a parallel node whose regions are
//!   atomic.

use crate::error::CoreError;
use crate::tree::{NodeId, NodeKind, StateTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Nested state value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Leaf(String),
    Branch(BTreeMap<String, StateValue>),
}

/// Resolves the ids of the active leaves described by a state value.
///
/// A string leaf yields `prefix.leaf`, a mapping the union over its entries
/// with `prefix.key`, and an empty mapping the prefix itself.
pub fn active_ids(value: &StateValue, prefix: &str) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    collect_ids(value, prefix, &mut ids);
    ids
}

fn collect_ids(value: &StateValue, prefix: &str, ids: &mut BTreeSet<String>) {
    match value {
        StateValue::Leaf(leaf) => {
            ids.insert(join(prefix, leaf));
        }
        StateValue::Branch(map) if map.is_empty() => {
            ids.insert(prefix.to_string());
        }
        StateValue::Branch(map) => {
            for (key, sub) in map {
                collect_ids(sub, &join(prefix, key), ids);
            }
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

impl StateValue {
    pub fn leaf(key: impl Into<String>) -> Self {
        StateValue::Leaf(key.into())
    }

    /// Active leaf ids under `prefix` (usually the machine id).
    pub fn active_ids(&self, prefix: &str) -> BTreeSet<String> {
        active_ids(self, prefix)
    }

    /// Returns true if the value includes the dotted path relative to the
    /// machine root, e.g. `"red"` or `"red.walk"` for `{ "red": "walk" }`.
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_matches('.');
        active_ids(self, "").iter().any(|id| {
            id == path || (id.starts_with(path) && id[path.len()..].starts_with('.'))
        })
    }

    /// Builds the value of a full configuration (leaves and their ancestors).
    pub fn from_configuration(
        tree: &StateTree,
        config: &BTreeSet<NodeId>,
    ) -> Result<Self, CoreError> {
        let root = tree.root();
        match tree.node(root).kind {
            NodeKind::Compound => {
                let child = active_child(tree, root, config)?;
                child_value(tree, child, config)
            }
            NodeKind::Parallel => region_map(tree, root, config),
            _ => Ok(StateValue::Branch(BTreeMap::new())),
        }
    }

    /// Resolves the value into a full configuration: every active node,
    /// leaves and ancestors. Fails if the value names unknown or non-leaf
    /// nodes, or does not describe exactly one child per active compound
    /// node and every region of active parallel nodes.
    pub fn to_configuration(&self, tree: &StateTree) -> Result<BTreeSet<NodeId>, CoreError> {
        let root = tree.root();
        let mut config = BTreeSet::new();
        config.insert(root);

        for id in self.active_ids(&tree.node(root).id) {
            let node = tree
                .lookup(&id)
                .ok_or_else(|| CoreError::transition(format!("unknown state '{}'", id)))?;
            if node != root && !tree.node(node).is_leaf() {
                return Err(CoreError::transition(format!(
                    "state '{}' is not an atomic or final state",
                    id
                )));
            }
            config.insert(node);
            config.extend(tree.ancestors(node));
        }

        for &node in &config {
            let active = tree
                .node(node)
                .children
                .iter()
                .filter(|c| config.contains(c))
                .count();
            let valid = match tree.node(node).kind {
                NodeKind::Compound => active == 1,
                NodeKind::Parallel => active == tree.regions(node).count(),
                _ => true,
            };
            if !valid {
                return Err(CoreError::transition(format!(
                    "state value {} is not a valid configuration of '{}'",
                    self,
                    tree.node(node).id
                )));
            }
        }

        Ok(config)
    }
}

fn active_child(
    tree: &StateTree,
    node: NodeId,
    config: &BTreeSet<NodeId>,
) -> Result<NodeId, CoreError> {
    tree.regions(node)
        .find(|c| config.contains(c))
        .ok_or_else(|| {
            CoreError::transition(format!(
                "compound state '{}' has no active child",
                tree.node(node).id
            ))
        })
}

/// Value of a compound's active child: the bare key for leaves.
fn child_value(
    tree: &StateTree,
    child: NodeId,
    config: &BTreeSet<NodeId>,
) -> Result<StateValue, CoreError> {
    let node = tree.node(child);
    if node.is_leaf() {
        return Ok(StateValue::Leaf(node.key.clone()));
    }
    let mut map = BTreeMap::new();
    map.insert(node.key.clone(), node_value(tree, child, config)?);
    Ok(StateValue::Branch(map))
}

fn node_value(
    tree: &StateTree,
    node: NodeId,
    config: &BTreeSet<NodeId>,
) -> Result<StateValue, CoreError> {
    match tree.node(node).kind {
        NodeKind::Compound => {
            let child = active_child(tree, node, config)?;
            child_value(tree, child, config)
        }
        NodeKind::Parallel => region_map(tree, node, config),
        _ => Ok(StateValue::Branch(BTreeMap::new())),
    }
}

fn region_map(
    tree: &StateTree,
    node: NodeId,
    config: &BTreeSet<NodeId>,
) -> Result<StateValue, CoreError> {
    let mut map = BTreeMap::new();
    for region in tree.regions(node) {
        map.insert(
            tree.node(region).key.clone(),
            node_value(tree, region, config)?,
        );
    }
    Ok(StateValue::Branch(map))
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Leaf(s.to_string())
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Leaf(leaf) => f.write_str(leaf),
            StateValue::Branch(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}
