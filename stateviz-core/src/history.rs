//! History pseudostate records.

use crate::tree::{HistoryKind, NodeId, NodeKind, StateTree};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What a history pseudostate remembered when its parent was last exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    pub kind: HistoryKind,
    /// Shallow: the active children of the parent.
    /// Deep: the active atomic and final descendants of the parent.
    pub nodes: Vec<NodeId>,
}

/// History records keyed by history node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStore {
    records: BTreeMap<NodeId, HistoryRecord>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every history child of `parent` from the configuration that is
    /// about to be exited.
    pub fn record(&mut self, tree: &StateTree, parent: NodeId, config: &BTreeSet<NodeId>) {
        for history in tree.history_children(parent) {
            let NodeKind::History(kind) = tree.node(history).kind else {
                continue;
            };
            let nodes: Vec<NodeId> = match kind {
                HistoryKind::Shallow => tree
                    .regions(parent)
                    .filter(|c| config.contains(c))
                    .collect(),
                HistoryKind::Deep => config
                    .iter()
                    .copied()
                    .filter(|&n| tree.node(n).is_leaf() && tree.is_descendant(n, parent))
                    .collect(),
            };

            tracing::trace!("Recording {} nodes for history {}", nodes.len(), tree.node(history).id);
            self.records.insert(history, HistoryRecord { kind, nodes });
        }
    }

    pub fn get(&self, history: NodeId) -> Option<&HistoryRecord> {
        self.records.get(&history)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &HistoryRecord)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::MachineDefinition;
    use crate::value::StateValue;
    use serde_json::json;

    fn machine() -> MachineDefinition {
        MachineDefinition::from_str(
            r#"{
                "id": "m",
                "initial": "a",
                "states": {
                    "a": {
                        "initial": "x",
                        "states": {
                            "x": { "initial": "x1", "states": { "x1": {}, "x2": {} } },
                            "y": {},
                            "h": { "history": "shallow" },
                            "d": { "history": "deep" }
                        }
                    },
                    "b": {}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_record_shallow_and_deep() {
        let def = machine();
        let tree = &def.tree;
        let value: StateValue = serde_json::from_value(json!({ "a": { "x": "x2" } })).unwrap();
        let config = value.to_configuration(tree).unwrap();

        let mut store = HistoryStore::new();
        store.record(tree, tree.lookup("m.a").unwrap(), &config);

        let shallow = store.get(tree.lookup("m.a.h").unwrap()).unwrap();
        assert_eq!(shallow.kind, HistoryKind::Shallow);
        assert_eq!(shallow.nodes, vec![tree.lookup("m.a.x").unwrap()]);

        let deep = store.get(tree.lookup("m.a.d").unwrap()).unwrap();
        assert_eq!(deep.kind, HistoryKind::Deep);
        assert_eq!(deep.nodes, vec![tree.lookup("m.a.x.x2").unwrap()]);
    }

    #[test]
    fn test_record_without_history_children() {
        let def = machine();
        let tree = &def.tree;
        let value: StateValue = serde_json::from_value(json!({ "a": { "x": "x1" } })).unwrap();
        let config = value.to_configuration(tree).unwrap();

        let mut store = HistoryStore::new();
        store.record(tree, tree.lookup("m.a.x").unwrap(), &config);
        assert!(store.is_empty());
    }
}
