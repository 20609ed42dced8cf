//! Static state tree.
//!
//! All nodes of a machine live in one arena, indexed by [`NodeId`] in
//! pre-order document order: a node's ancestors always have smaller ids than
//! the node itself, and siblings are ordered as written.

use crate::definition::{StateConfig, StateType, TransitionConfig};
use crate::error::CoreError;
use crate::event::{after_event_name, done_event_name};
use crate::guard::Guard;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Index of a node in its [`StateTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// History pseudostate depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Shallow,
    Deep,
}

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History(HistoryKind),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Atomic => "atomic",
            NodeKind::Compound => "compound",
            NodeKind::Parallel => "parallel",
            NodeKind::Final => "final",
            NodeKind::History(HistoryKind::Shallow) => "history",
            NodeKind::History(HistoryKind::Deep) => "deep history",
        }
    }

    /// Atomic and final nodes are the leaves of a configuration.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Atomic | NodeKind::Final)
    }

    pub fn is_history(&self) -> bool {
        matches!(self, NodeKind::History(_))
    }
}

/// An action name, executed in order by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(pub String);

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One candidate transition of a node for an event.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub event: String,
    pub source: NodeId,
    /// Raw target label (`sibling`, `.child`, `#id`); `None` runs actions only.
    pub target: Option<String>,
    pub guard: Option<Guard>,
    pub actions: Vec<Action>,
    /// Delay in milliseconds for `after` transitions.
    pub delay_ms: Option<u64>,
    /// Declaration order among the candidates of `(source, event)`.
    pub index: usize,
}

impl Candidate {
    /// Returns true when both refer to the same declared candidate.
    pub fn same_as(&self, other: &Candidate) -> bool {
        self.source == other.source && self.event == other.event && self.index == other.index
    }
}

/// A node of the state tree.
#[derive(Debug, Clone)]
pub struct StateNode {
    pub index: NodeId,
    /// Fully qualified dotted id (`light.red.walk`).
    pub id: String,
    /// Local key (`walk`).
    pub key: String,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Initial child key of a compound node.
    pub initial: Option<String>,
    pub entry: Vec<Action>,
    pub exit: Vec<Action>,
    pub depth: usize,
    transitions: Vec<(String, Vec<Candidate>)>,
}

impl StateNode {
    /// Candidates for an event, in declaration order.
    pub fn candidates(&self, event: &str) -> &[Candidate] {
        self.transitions
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, candidates)| candidates.as_slice())
            .unwrap_or(&[])
    }

    /// Events this node handles, in declaration order.
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.transitions.iter().map(|(name, _)| name.as_str())
    }

    /// All `(event, candidates)` pairs in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = (&str, &[Candidate])> {
        self.transitions
            .iter()
            .map(|(name, candidates)| (name.as_str(), candidates.as_slice()))
    }

    /// Delayed events of this node with their delays, one per event.
    pub fn delayed_events(&self) -> impl Iterator<Item = (&str, u64)> {
        self.transitions.iter().filter_map(|(name, candidates)| {
            candidates
                .first()
                .and_then(|c| c.delay_ms)
                .map(|delay| (name.as_str(), delay))
        })
    }

    pub fn is_leaf(&self) -> bool {
        self.kind.is_leaf()
    }
}

/// Arena of state nodes built from a definition.
#[derive(Debug, Clone)]
pub struct StateTree {
    nodes: Vec<StateNode>,
    by_id: HashMap<String, NodeId>,
}

impl StateTree {
    /// Builds and validates the tree of a machine whose root id is `name`.
    pub fn build(name: &str, root: &StateConfig) -> Result<Self, CoreError> {
        validate_key(name)?;

        let mut tree = Self {
            nodes: Vec::new(),
            by_id: HashMap::new(),
        };
        tree.add_node(None, name, name.to_string(), root, 0)?;
        tree.validate_targets()?;

        Ok(tree)
    }

    fn add_node(
        &mut self,
        parent: Option<NodeId>,
        key: &str,
        id: String,
        config: &StateConfig,
        depth: usize,
    ) -> Result<NodeId, CoreError> {
        let kind = infer_kind(&id, config)?;
        if parent.is_none() && kind.is_history() {
            return Err(CoreError::definition("the root node cannot be a history node"));
        }
        if !config.states.is_empty() && !matches!(kind, NodeKind::Compound | NodeKind::Parallel) {
            return Err(CoreError::definition(format!(
                "{} node '{}' cannot have child states",
                kind.name(),
                id
            )));
        }

        let index = NodeId(self.nodes.len());
        if self.by_id.insert(id.clone(), index).is_some() {
            return Err(CoreError::definition(format!("duplicate state id: {}", id)));
        }
        if parent.is_some() {
            if let Some(alias) = &config.id {
                validate_key(alias)?;
                if self.by_id.insert(alias.clone(), index).is_some() {
                    return Err(CoreError::definition(format!("duplicate state id: {}", alias)));
                }
            }
        }

        let transitions = build_transitions(index, &id, config)?;
        self.nodes.push(StateNode {
            index,
            id: id.clone(),
            key: key.to_string(),
            kind,
            parent,
            children: Vec::new(),
            initial: None,
            entry: config.on_entry.0.clone(),
            exit: config.on_exit.0.clone(),
            depth,
            transitions,
        });

        let mut children = Vec::with_capacity(config.states.len());
        for (child_key, child_config) in &config.states {
            validate_key(child_key)?;
            if children
                .iter()
                .any(|c: &NodeId| self.nodes[c.0].key == *child_key)
            {
                return Err(CoreError::definition(format!(
                    "duplicate state '{}' in '{}'",
                    child_key, id
                )));
            }
            let child_id = format!("{}.{}", id, child_key);
            children.push(self.add_node(Some(index), child_key, child_id, child_config, depth + 1)?);
        }

        let initial = match kind {
            NodeKind::Compound => {
                let initial = config.initial.clone().ok_or_else(|| {
                    CoreError::definition(format!("compound state '{}' has no initial state", id))
                })?;
                let child = children
                    .iter()
                    .find(|c| self.nodes[c.0].key == initial)
                    .ok_or_else(|| {
                        CoreError::definition(format!(
                            "initial state '{}' of '{}' is not a child state",
                            initial, id
                        ))
                    })?;
                if self.nodes[child.0].kind.is_history() {
                    return Err(CoreError::definition(format!(
                        "initial state '{}' of '{}' cannot be a history state",
                        initial, id
                    )));
                }
                Some(initial)
            }
            _ => None,
        };

        let node = &mut self.nodes[index.0];
        node.children = children;
        node.initial = initial;

        Ok(index)
    }

    fn validate_targets(&self) -> Result<(), CoreError> {
        for node in &self.nodes {
            for (_, candidates) in node.transitions() {
                for candidate in candidates {
                    if let Some(target) = &candidate.target {
                        if self.resolve_target(node.index, target).is_none() {
                            return Err(CoreError::definition(format!(
                                "transition '{}' of '{}' has unknown target '{}'",
                                candidate.event, node.id, target
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Returns the node for an id issued by this tree.
    pub fn node(&self, id: NodeId) -> &StateNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&StateNode> {
        self.nodes.get(id.0)
    }

    /// Looks up a node by its dotted id or custom `id`.
    pub fn lookup(&self, id: &str) -> Option<NodeId> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in document order.
    pub fn iter(&self) -> impl Iterator<Item = &StateNode> {
        self.nodes.iter()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Proper ancestors, innermost first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// Returns true if `node` is a proper descendant of `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        node > ancestor && self.ancestors(node).any(|a| a == ancestor)
    }

    pub fn child(&self, parent: NodeId, key: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).key == key)
    }

    /// Default initial child of a compound node.
    pub fn initial_child(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id);
        node.initial
            .as_deref()
            .and_then(|key| self.child(id, key))
    }

    /// Child states that take part in a configuration (history excluded).
    pub fn regions(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(move |&c| !self.node(c).kind.is_history())
    }

    pub fn history_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .children
            .iter()
            .copied()
            .filter(move |&c| self.node(c).kind.is_history())
    }

    /// Resolves a target label written on `source`.
    ///
    /// `#id` is absolute, `.a.b` descends from the source itself and `a.b`
    /// starts at the source's parent (at the root, at the root itself).
    pub fn resolve_target(&self, source: NodeId, label: &str) -> Option<NodeId> {
        if let Some(id) = label.strip_prefix('#') {
            return self.lookup(id);
        }

        let (base, path) = match label.strip_prefix('.') {
            Some(path) => (source, path),
            None => (self.parent(source).unwrap_or(source), label),
        };

        path.split('.')
            .try_fold(base, |node, key| self.child(node, key))
    }
}

fn validate_key(key: &str) -> Result<(), CoreError> {
    if key.is_empty() {
        return Err(CoreError::definition("state key cannot be empty"));
    }
    if key.contains('.') || key.contains('#') {
        return Err(CoreError::definition(format!(
            "state key '{}' cannot contain '.' or '#'",
            key
        )));
    }
    Ok(())
}

fn infer_kind(id: &str, config: &StateConfig) -> Result<NodeKind, CoreError> {
    let history = config.history.and_then(|h| h.kind());

    let kind = match config.kind {
        Some(StateType::Atomic) => NodeKind::Atomic,
        Some(StateType::Compound) => NodeKind::Compound,
        Some(StateType::Parallel) => NodeKind::Parallel,
        Some(StateType::Final) => NodeKind::Final,
        Some(StateType::History) => NodeKind::History(history.unwrap_or(HistoryKind::Shallow)),
        None if history.is_some() => NodeKind::History(history.unwrap_or(HistoryKind::Shallow)),
        None if config.parallel => NodeKind::Parallel,
        None if !config.states.is_empty() => NodeKind::Compound,
        None => NodeKind::Atomic,
    };

    if config.parallel && kind != NodeKind::Parallel {
        return Err(CoreError::definition(format!(
            "state '{}' is marked parallel but has type {}",
            id,
            kind.name()
        )));
    }
    if history.is_some() && !kind.is_history() {
        return Err(CoreError::definition(format!(
            "state '{}' has a history mode but type {}",
            id,
            kind.name()
        )));
    }
    if kind == NodeKind::Compound && config.states.is_empty() {
        return Err(CoreError::definition(format!(
            "compound state '{}' has no child states",
            id
        )));
    }
    if kind.is_history()
        && (!config.on.is_empty() || !config.after.is_empty() || config.on_done.is_some())
    {
        return Err(CoreError::definition(format!(
            "history state '{}' cannot have transitions",
            id
        )));
    }

    Ok(kind)
}

fn build_transitions(
    source: NodeId,
    id: &str,
    config: &StateConfig,
) -> Result<Vec<(String, Vec<Candidate>)>, CoreError> {
    let mut transitions: Vec<(String, Vec<Candidate>)> = Vec::new();

    let mut push = |event: String,
                    transition: &TransitionConfig,
                    delay_ms: Option<u64>|
     -> Result<(), CoreError> {
        if transitions.iter().any(|(name, _)| *name == event) {
            return Err(CoreError::definition(format!(
                "state '{}' declares event '{}' more than once",
                id, event
            )));
        }
        let candidates = transition
            .0
            .iter()
            .enumerate()
            .map(|(index, c)| {
                Ok(Candidate {
                    event: event.clone(),
                    source,
                    target: c.target.clone(),
                    guard: c.cond.as_ref().map(|g| g.parse()).transpose()?,
                    actions: c.actions.0.clone(),
                    delay_ms,
                    index,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        transitions.push((event, candidates));
        Ok(())
    };

    for (event, transition) in &config.on {
        push(event.clone(), transition, None)?;
    }
    for (delay, transition) in &config.after {
        let delay_ms: u64 = delay.trim().parse().map_err(|_| {
            CoreError::definition(format!(
                "delay '{}' of state '{}' is not a number of milliseconds",
                delay, id
            ))
        })?;
        push(after_event_name(delay_ms, id), transition, Some(delay_ms))?;
    }
    if let Some(on_done) = &config.on_done {
        push(done_event_name(id), on_done, None)?;
    }

    Ok(transitions)
}
