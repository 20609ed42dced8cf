//! Graph extraction.
//!
//! Turns a [`StateTree`] into the node and edge lists a renderer draws:
//! one box per state, one edge per targeted candidate transition, and a
//! synthetic initial marker with pointer edges for every compound and
//! parallel node.

use serde::Serialize;
use stateviz_core::event::{is_done_event, parse_after_delay};
use stateviz_core::{Candidate, NodeKind, StateTree};
use std::collections::HashSet;

const INITIAL_SUFFIX: &str = ":initial";

/// What a node box represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    State(NodeKind),
    /// The filled dot pointing at a node's default child.
    InitialMarker,
}

/// A node box.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: String,
    pub key: String,
    pub parent: Option<String>,
    pub role: NodeRole,
    pub depth: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<String>,
}

impl NodeView {
    pub fn is_initial_marker(&self) -> bool {
        self.role == NodeRole::InitialMarker
    }
}

/// Kind of edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Transition,
    /// Initial pointer; no event label, filled circular source marker.
    Initial,
}

/// A connector between two node boxes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeView {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    /// Declaration order among the candidates of `(source, event)`.
    pub order: usize,
    pub label: String,
}

/// Static view graph of a machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

/// Extracts the view graph of a state tree. Deterministic for a given tree.
pub fn extract(tree: &StateTree) -> Graph {
    let mut graph = Graph::default();
    let mut edge_ids: HashSet<String> = HashSet::new();

    for node in tree.iter() {
        let parent = node.parent.map(|p| tree.node(p).id.clone());
        graph.nodes.push(NodeView {
            id: node.id.clone(),
            key: node.key.clone(),
            parent,
            role: NodeRole::State(node.kind),
            depth: node.depth,
            entry: node.entry.iter().map(|a| a.to_string()).collect(),
            exit: node.exit.iter().map(|a| a.to_string()).collect(),
        });

        let pointed: Vec<_> = match node.kind {
            NodeKind::Compound => tree.initial_child(node.index).into_iter().collect(),
            NodeKind::Parallel => tree.regions(node.index).collect(),
            _ => Vec::new(),
        };
        if !pointed.is_empty() {
            let marker = initial_marker_id(&node.id);
            graph.nodes.push(NodeView {
                id: marker.clone(),
                key: "initial".to_string(),
                parent: Some(node.id.clone()),
                role: NodeRole::InitialMarker,
                depth: node.depth + 1,
                entry: Vec::new(),
                exit: Vec::new(),
            });
            for (order, child) in pointed.into_iter().enumerate() {
                let target = tree.node(child).id.clone();
                let id = unique_id(&mut edge_ids, format!("{}:{}", marker, target), order);
                graph.edges.push(EdgeView {
                    id,
                    source: marker.clone(),
                    target,
                    kind: EdgeKind::Initial,
                    event: None,
                    guard: None,
                    actions: Vec::new(),
                    order,
                    label: String::new(),
                });
            }
        }

        for (_, candidates) in node.transitions() {
            for candidate in candidates {
                if let Some(edge) = transition_edge(tree, candidate, &mut edge_ids) {
                    graph.edges.push(edge);
                }
            }
        }
    }

    tracing::debug!(
        "Extracted graph with {} nodes and {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );
    graph
}

fn transition_edge(
    tree: &StateTree,
    candidate: &Candidate,
    edge_ids: &mut HashSet<String>,
) -> Option<EdgeView> {
    let label = candidate.target.as_deref()?;
    let target = tree.resolve_target(candidate.source, label)?;
    let source = tree.node(candidate.source).id.clone();
    let target = tree.node(target).id.clone();

    let guard = candidate.guard.as_ref().map(|g| g.label().to_string());
    let actions: Vec<String> = candidate.actions.iter().map(|a| a.to_string()).collect();
    let id = unique_id(
        edge_ids,
        format!("{}:{}::{}", source, target, candidate.event),
        candidate.index,
    );

    Some(EdgeView {
        id,
        label: edge_label(&candidate.event, guard.as_deref(), &actions),
        source,
        target,
        kind: EdgeKind::Transition,
        event: Some(candidate.event.clone()),
        guard,
        actions,
        order: candidate.index,
    })
}

fn unique_id(ids: &mut HashSet<String>, id: String, order: usize) -> String {
    if ids.insert(id.clone()) {
        return id;
    }
    let id = format!("{}#{}", id, order);
    ids.insert(id.clone());
    id
}

/// Edge caption: `EVENT [guard]` with a `\n / a, b` line for actions.
pub fn edge_label(event: &str, guard: Option<&str>, actions: &[String]) -> String {
    let mut label = friendly_event_name(event);
    if let Some(guard) = guard {
        label.push_str(&format!(" [{}]", guard));
    }
    if !actions.is_empty() {
        label.push_str(&format!("\n / {}", actions.join(", ")));
    }
    label
}

/// Display name of an event: `after 1000ms`, `(done)`, `?` for eventless.
pub fn friendly_event_name(event: &str) -> String {
    if event.is_empty() {
        return "?".to_string();
    }
    if let Some(delay) = parse_after_delay(event) {
        return format!("after {}ms", delay);
    }
    if is_done_event(event) {
        return "(done)".to_string();
    }
    event.to_string()
}

pub fn initial_marker_id(node_id: &str) -> String {
    format!("{}{}", node_id, INITIAL_SUFFIX)
}

/// Id of the event label box a transition edge starts from.
pub fn event_anchor_id(source: &str, event: &str) -> String {
    format!("{}:{}", source, event)
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&NodeView> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&EdgeView> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Proper ancestors of a node, innermost first.
    pub fn ancestors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a NodeView> + 'a {
        let first = self.node(id).and_then(|n| n.parent.as_deref());
        std::iter::successors(first.and_then(|p| self.node(p)), move |n| {
            n.parent.as_deref().and_then(|p| self.node(p))
        })
    }

    /// Transition edges leaving a node, in declaration order.
    pub fn edges_from<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a EdgeView> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.kind == EdgeKind::Transition && e.source == source)
    }

    /// Events of a node's own transitions, in declaration order.
    pub fn events_of<'a>(&'a self, source: &'a str) -> Vec<&'a str> {
        let mut events: Vec<&str> = Vec::new();
        for edge in self.edges_from(source) {
            if let Some(event) = edge.event.as_deref() {
                if !events.contains(&event) {
                    events.push(event);
                }
            }
        }
        events
    }

    pub fn transition_edges(&self) -> impl Iterator<Item = &EdgeView> {
        self.edges.iter().filter(|e| e.kind == EdgeKind::Transition)
    }
}
