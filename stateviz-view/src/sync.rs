//! Marker synchronization.
//!
//! The synchronizer keeps an overlay of markers on top of an immutable
//! [`Graph`] and reports every change as a [`MarkerDelta`], so a renderer
//! only touches what changed. Each sync operation owns one or two marker
//! kinds and never touches the others.

use crate::graph::{EdgeKind, Graph};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A visual marker on a node or edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// Node is in the current configuration.
    Active,
    /// Node is in the configuration the hovered event would produce.
    Preview,
    /// Edge would be taken by the hovered event.
    Highlight,
    /// Edge's event is not enabled in the current configuration.
    Disabled,
}

pub type MarkerSet = BTreeSet<Marker>;

static NO_MARKERS: MarkerSet = BTreeSet::new();

/// Markers added and removed by one sync operation, sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MarkerDelta {
    pub added: Vec<(String, Marker)>,
    pub removed: Vec<(String, Marker)>,
}

impl MarkerDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    fn merge(mut self, other: MarkerDelta) -> Self {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self
    }
}

/// Overlay of markers for one graph.
#[derive(Debug, Clone, Default)]
pub struct ViewSynchronizer {
    graph: Graph,
    overlay: BTreeMap<String, MarkerSet>,
}

impl ViewSynchronizer {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            overlay: BTreeMap::new(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Replaces the graph and drops every marker.
    pub fn set_graph(&mut self, graph: Graph) {
        self.graph = graph;
        self.overlay.clear();
    }

    pub fn overlay(&self) -> &BTreeMap<String, MarkerSet> {
        &self.overlay
    }

    pub fn markers(&self, id: &str) -> &MarkerSet {
        self.overlay.get(id).unwrap_or(&NO_MARKERS)
    }

    pub fn has(&self, id: &str, marker: Marker) -> bool {
        self.markers(id).contains(&marker)
    }

    /// Ids carrying a marker, sorted.
    pub fn marked(&self, marker: Marker) -> BTreeSet<&str> {
        self.overlay
            .iter()
            .filter(|(_, markers)| markers.contains(&marker))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Marks the active leaves and all their ancestors.
    pub fn sync_active<I, S>(&mut self, leaf_ids: I) -> MarkerDelta
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let active = self.expand(leaf_ids);
        self.apply(Marker::Active, active)
    }

    /// Marks the configuration `event` would produce, and the edges from
    /// active nodes on `event` that lead into it.
    pub fn sync_preview<I, S>(&mut self, event: &str, preview_leaf_ids: I) -> MarkerDelta
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let preview = self.expand(preview_leaf_ids);
        let highlighted: BTreeSet<String> = self
            .graph
            .transition_edges()
            .filter(|edge| {
                edge.event.as_deref() == Some(event)
                    && self.has(&edge.source, Marker::Active)
                    && preview.contains(&edge.target)
            })
            .map(|edge| edge.id.clone())
            .collect();

        self.apply(Marker::Preview, preview)
            .merge(self.apply(Marker::Highlight, highlighted))
    }

    pub fn clear_preview(&mut self) -> MarkerDelta {
        self.apply(Marker::Preview, BTreeSet::new())
            .merge(self.apply(Marker::Highlight, BTreeSet::new()))
    }

    /// Disables transition edges whose event is not in `next_events`.
    pub fn sync_enabled<I, S>(&mut self, next_events: I) -> MarkerDelta
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let enabled: BTreeSet<String> = next_events
            .into_iter()
            .map(|e| e.as_ref().to_string())
            .collect();
        let disabled: BTreeSet<String> = self
            .graph
            .edges
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Transition)
            .filter(|edge| {
                edge.event
                    .as_ref()
                    .is_some_and(|event| !enabled.contains(event))
            })
            .map(|edge| edge.id.clone())
            .collect();

        self.apply(Marker::Disabled, disabled)
    }

    /// Leaf ids plus their graph ancestors. Unknown ids are skipped.
    fn expand<I, S>(&self, leaf_ids: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ids = BTreeSet::new();
        for leaf in leaf_ids {
            let leaf = leaf.as_ref();
            if self.graph.node(leaf).is_none() {
                tracing::debug!("Ignoring unknown node id {}", leaf);
                continue;
            }
            ids.insert(leaf.to_string());
            ids.extend(self.graph.ancestors(leaf).map(|n| n.id.clone()));
        }
        ids
    }

    /// Makes `wanted` the exact set of ids carrying `marker`.
    fn apply(&mut self, marker: Marker, wanted: BTreeSet<String>) -> MarkerDelta {
        let mut delta = MarkerDelta::default();

        for (id, markers) in self.overlay.iter_mut() {
            if markers.contains(&marker) && !wanted.contains(id) {
                markers.remove(&marker);
                delta.removed.push((id.clone(), marker));
            }
        }
        self.overlay.retain(|_, markers| !markers.is_empty());

        for id in wanted {
            let markers = self.overlay.entry(id.clone()).or_default();
            if markers.insert(marker) {
                delta.added.push((id, marker));
            }
        }

        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::extract;
    use proptest::prelude::*;
    use stateviz_core::MachineDefinition;

    fn sync() -> ViewSynchronizer {
        let def = MachineDefinition::from_str(
            r#"{
                "id": "light",
                "initial": "green",
                "states": {
                    "green": { "on": { "TIMER": "yellow" } },
                    "yellow": { "on": { "TIMER": "red" } },
                    "red": {
                        "initial": "walk",
                        "on": { "TIMER": "green" },
                        "states": { "walk": { "on": { "PED": "stop" } }, "stop": {} }
                    }
                }
            }"#,
        )
        .unwrap();
        ViewSynchronizer::new(extract(&def.tree))
    }

    #[test]
    fn test_sync_active_expands_ancestors() {
        let mut sync = sync();
        let delta = sync.sync_active(["light.red.walk"]);

        assert_eq!(
            delta.added,
            vec![
                ("light".to_string(), Marker::Active),
                ("light.red".to_string(), Marker::Active),
                ("light.red.walk".to_string(), Marker::Active),
            ]
        );
        assert!(delta.removed.is_empty());
        assert!(sync.has("light.red", Marker::Active));
    }

    #[test]
    fn test_sync_active_is_idempotent() {
        let mut sync = sync();
        sync.sync_active(["light.green"]);
        let overlay = sync.overlay().clone();

        let delta = sync.sync_active(["light.green"]);
        assert!(delta.is_empty());
        assert_eq!(sync.overlay(), &overlay);
    }

    #[test]
    fn test_sync_active_delta() {
        let mut sync = sync();
        sync.sync_active(["light.green"]);
        let delta = sync.sync_active(["light.yellow"]);

        assert_eq!(delta.added, vec![("light.yellow".to_string(), Marker::Active)]);
        assert_eq!(delta.removed, vec![("light.green".to_string(), Marker::Active)]);
        assert!(sync.markers("light.green").is_empty());
        assert!(!sync.overlay().contains_key("light.green"));
    }

    #[test]
    fn test_sync_preview_highlights_taken_edge() {
        let mut sync = sync();
        sync.sync_active(["light.yellow"]);
        sync.sync_preview("TIMER", ["light.red.walk"]);

        assert!(sync.has("light.red", Marker::Preview));
        assert!(sync.has("light.red.walk", Marker::Preview));
        assert_eq!(
            sync.marked(Marker::Highlight),
            BTreeSet::from(["light.yellow:light.red::TIMER"])
        );
        // Active markers are untouched by previews.
        assert!(sync.has("light.yellow", Marker::Active));
    }

    #[test]
    fn test_highlight_requires_active_source() {
        let mut sync = sync();
        sync.sync_active(["light.green"]);
        sync.sync_preview("TIMER", ["light.yellow"]);
        assert_eq!(
            sync.marked(Marker::Highlight),
            BTreeSet::from(["light.green:light.yellow::TIMER"])
        );
    }

    #[test]
    fn test_clear_preview() {
        let mut sync = sync();
        sync.sync_active(["light.yellow"]);
        sync.sync_preview("TIMER", ["light.red.walk"]);

        let delta = sync.clear_preview();
        assert_eq!(delta.removed.len(), 4);
        assert!(sync.marked(Marker::Preview).is_empty());
        assert!(sync.marked(Marker::Highlight).is_empty());
        assert!(sync.has("light", Marker::Active));
        assert!(sync.clear_preview().is_empty());
    }

    #[test]
    fn test_sync_enabled() {
        let mut sync = sync();
        sync.sync_enabled(["TIMER"]);
        assert_eq!(
            sync.marked(Marker::Disabled),
            BTreeSet::from(["light.red.walk:light.red.stop::PED"])
        );

        let delta = sync.sync_enabled(["TIMER", "PED"]);
        assert_eq!(delta.removed.len(), 1);
        assert!(sync.marked(Marker::Disabled).is_empty());
    }

    #[test]
    fn test_unknown_ids_are_ignored() {
        let mut sync = sync();
        let delta = sync.sync_active(["light.purple"]);
        assert!(delta.is_empty());
    }

    #[test]
    fn test_set_graph_resets_overlay() {
        let mut sync = sync();
        sync.sync_active(["light.green"]);
        let graph = sync.graph().clone();
        sync.set_graph(graph);
        assert!(sync.overlay().is_empty());
    }

    const LEAVES: [&str; 5] = [
        "light.green",
        "light.yellow",
        "light.red.walk",
        "light.red.stop",
        "light.purple",
    ];

    proptest! {
        #[test]
        fn prop_sync_active_is_idempotent(
            first in proptest::sample::subsequence(LEAVES.to_vec(), 0..=LEAVES.len()),
            second in proptest::sample::subsequence(LEAVES.to_vec(), 0..=LEAVES.len()),
        ) {
            let mut sync = sync();
            sync.sync_active(&first);
            sync.sync_active(&second);
            let overlay = sync.overlay().clone();

            prop_assert!(sync.sync_active(&second).is_empty());
            prop_assert_eq!(sync.overlay(), &overlay);

            // Every marked node is a known leaf or an ancestor of one
            for id in sync.marked(Marker::Active) {
                let prefix = format!("{}.", id);
                prop_assert!(second.iter().any(|leaf| *leaf == id || leaf.starts_with(&prefix)));
            }
        }

        #[test]
        fn prop_delta_replays_to_overlay(
            first in proptest::sample::subsequence(LEAVES.to_vec(), 0..=LEAVES.len()),
            second in proptest::sample::subsequence(LEAVES.to_vec(), 0..=LEAVES.len()),
        ) {
            let mut sync = sync();
            sync.sync_active(&first);
            let mut replayed: BTreeSet<String> =
                sync.marked(Marker::Active).into_iter().map(String::from).collect();

            let delta = sync.sync_active(&second);
            for (id, _) in &delta.removed {
                prop_assert!(replayed.remove(id));
            }
            for (id, _) in delta.added {
                prop_assert!(replayed.insert(id));
            }

            let expected: BTreeSet<String> =
                sync.marked(Marker::Active).into_iter().map(String::from).collect();
            prop_assert_eq!(replayed, expected);
        }
    }
}
