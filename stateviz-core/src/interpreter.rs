//! Statechart interpreter.
//!
//! [`Machine::transition`] is a pure function from a state and an event to
//! the next state. [`Interpreter`] owns one state, commits successful steps
//! and tracks timer deadlines.
//!
//! One `send` is a macrostep: the microstep selected by the event, then
//! eventless transitions and queued `done.state.*` events until the
//! configuration is stable.

use crate::definition::MachineDefinition;
use crate::error::CoreError;
use crate::event::{Event, EVENTLESS};
use crate::guard::GuardEvaluator;
use crate::history::HistoryStore;
use crate::state::InterpreterState;
use crate::timer::{TimerCommand, TimerKey, TimerRegistry};
use crate::tree::{Action, Candidate, NodeId, NodeKind, StateTree};
use crate::value::StateValue;
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Default bound on internal microsteps per event.
pub const DEFAULT_TRANSIENT_LIMIT: usize = 100;

/// Name of the event that produces the initial state.
pub const INIT_EVENT: &str = "xstate.init";

/// A machine definition bound to its guard implementations.
#[derive(Debug, Clone)]
pub struct Machine {
    definition: Arc<MachineDefinition>,
    guards: GuardEvaluator,
    transient_limit: usize,
}

impl Machine {
    pub fn new(definition: MachineDefinition) -> Self {
        Self::from_arc(Arc::new(definition))
    }

    pub fn from_arc(definition: Arc<MachineDefinition>) -> Self {
        Self {
            definition,
            guards: GuardEvaluator::new(),
            transient_limit: DEFAULT_TRANSIENT_LIMIT,
        }
    }

    /// Parses a JSON definition into a machine with no named guards.
    pub fn from_str(json: &str) -> Result<Self, CoreError> {
        Ok(Self::new(MachineDefinition::from_str(json)?))
    }

    pub fn with_guards(mut self, guards: GuardEvaluator) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_transient_limit(mut self, limit: usize) -> Self {
        self.transient_limit = limit;
        self
    }

    pub fn id(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<MachineDefinition> {
        &self.definition
    }

    pub fn tree(&self) -> &StateTree {
        &self.definition.tree
    }

    pub fn guards(&self) -> &GuardEvaluator {
        &self.guards
    }

    pub fn transient_limit(&self) -> usize {
        self.transient_limit
    }

    /// Resolves a state value into the full set of active nodes.
    pub fn configuration(&self, value: &StateValue) -> Result<BTreeSet<NodeId>, CoreError> {
        value.to_configuration(self.tree())
    }

    /// Active leaf ids of a state.
    pub fn active_ids(&self, state: &InterpreterState) -> BTreeSet<String> {
        state.active_ids(self.id())
    }

    /// Settled initial state, with the entry actions of the initial
    /// configuration.
    pub fn initial_state(&self) -> Result<InterpreterState, CoreError> {
        let event = Event::new(INIT_EVENT);
        let mut step = Step::new(
            self,
            BTreeSet::new(),
            self.definition.context.clone(),
            HistoryStore::new(),
        );

        let root = self.tree().root();
        let mut entry = BTreeSet::new();
        step.add_descendants(root, &mut entry);
        step.enter(entry);
        step.settle(&event)?;

        step.finish(event, true)
    }

    /// Computes the state that follows `event`. Never mutates `state`.
    pub fn transition(
        &self,
        state: &InterpreterState,
        event: &Event,
    ) -> Result<InterpreterState, CoreError> {
        if state.done {
            tracing::debug!("Machine is done, ignoring {}", event);
            return Ok(state.unchanged(event));
        }

        let config = self.configuration(&state.value)?;
        let mut step = Step::new(self, config, state.context.clone(), state.history.clone());

        let selected = step.select(&event.name, event)?;
        if selected.is_empty() {
            tracing::debug!("Event {} not handled in {}", event, state.value);
            return Ok(state.unchanged(event));
        }

        step.microstep(&selected)?;
        step.settle(event)?;

        step.finish(event.clone(), true)
    }

    /// Events handled by some active node with a target or actions, in
    /// document order. Synthetic delayed and completion events are omitted.
    pub fn next_events(&self, state: &InterpreterState) -> Result<Vec<String>, CoreError> {
        if state.done {
            return Ok(Vec::new());
        }

        let config = self.configuration(&state.value)?;
        let tree = self.tree();
        let mut events: Vec<String> = Vec::new();

        for &id in &config {
            for (event, candidates) in tree.node(id).transitions() {
                let synthetic = event == EVENTLESS
                    || crate::event::is_done_event(event)
                    || candidates.iter().any(|c| c.delay_ms.is_some());
                if synthetic || events.iter().any(|e| e == event) {
                    continue;
                }
                if candidates
                    .iter()
                    .any(|c| c.target.is_some() || !c.actions.is_empty())
                {
                    events.push(event.to_string());
                }
            }
        }

        Ok(events)
    }

    /// Returns true if some active node handles the event.
    pub fn can_handle(&self, state: &InterpreterState, event: &str) -> Result<bool, CoreError> {
        Ok(self.next_events(state)?.iter().any(|e| e == event))
    }
}

/// Working copy of a configuration during one macrostep.
struct Step<'m> {
    machine: &'m Machine,
    config: BTreeSet<NodeId>,
    context: Value,
    history: HistoryStore,
    actions: Vec<Action>,
    timers: Vec<TimerCommand>,
    internal: VecDeque<Event>,
    done: bool,
}

impl<'m> Step<'m> {
    fn new(
        machine: &'m Machine,
        config: BTreeSet<NodeId>,
        context: Value,
        history: HistoryStore,
    ) -> Self {
        Self {
            machine,
            config,
            context,
            history,
            actions: Vec::new(),
            timers: Vec::new(),
            internal: VecDeque::new(),
            done: false,
        }
    }

    fn tree(&self) -> &'m StateTree {
        self.machine.tree()
    }

    /// Selects at most one enabled candidate per active leaf, innermost node
    /// first, then resolves conflicts between the selections.
    fn select(&self, name: &str, event: &Event) -> Result<Vec<&'m Candidate>, CoreError> {
        let tree = self.tree();
        let mut selected: Vec<&'m Candidate> = Vec::new();

        for &leaf in self.config.iter().filter(|&&n| tree.node(n).is_leaf()) {
            'walk: for node in std::iter::once(leaf).chain(tree.ancestors(leaf)) {
                for candidate in tree.node(node).candidates(name) {
                    if self.enabled(candidate, event)? {
                        if !selected.iter().any(|s| s.same_as(candidate)) {
                            selected.push(candidate);
                        }
                        break 'walk;
                    }
                }
            }
        }

        // A descendant's transition preempts a conflicting one from an
        // ancestor; otherwise the earlier selection wins.
        let mut kept: Vec<(&'m Candidate, BTreeSet<NodeId>)> = Vec::with_capacity(selected.len());
        for candidate in selected {
            let exits = self.exit_set(candidate)?;
            let mut preempted = Vec::new();
            let mut dropped = false;

            for (i, (other, other_exits)) in kept.iter().enumerate() {
                if exits.is_disjoint(other_exits) {
                    continue;
                }
                if tree.is_descendant(candidate.source, other.source) {
                    preempted.push(i);
                } else {
                    dropped = true;
                    break;
                }
            }

            if dropped {
                tracing::debug!(
                    "Dropping conflicting transition {} on {}",
                    tree.node(candidate.source).id,
                    candidate.event
                );
                continue;
            }
            for i in preempted.into_iter().rev() {
                let (other, _) = kept.remove(i);
                tracing::debug!(
                    "Transition {} on {} preempted by {}",
                    tree.node(other.source).id,
                    other.event,
                    tree.node(candidate.source).id
                );
            }
            kept.push((candidate, exits));
        }

        Ok(kept.into_iter().map(|(candidate, _)| candidate).collect())
    }

    fn enabled(&self, candidate: &Candidate, event: &Event) -> Result<bool, CoreError> {
        self.machine
            .guards
            .evaluate_opt(candidate.guard.as_ref(), &self.context, event)
    }

    fn resolve(&self, candidate: &Candidate, target: &str) -> Result<NodeId, CoreError> {
        self.tree()
            .resolve_target(candidate.source, target)
            .ok_or_else(|| {
                CoreError::transition(format!(
                    "target '{}' of '{}' on '{}' does not exist",
                    target,
                    self.tree().node(candidate.source).id,
                    candidate.event
                ))
            })
    }

    /// Nearest compound proper ancestor of the source containing the target.
    /// A `.child` target keeps the source itself active.
    fn domain(&self, candidate: &Candidate, target: NodeId) -> NodeId {
        let tree = self.tree();
        let internal = candidate
            .target
            .as_deref()
            .is_some_and(|label| label.starts_with('.'));
        if internal && tree.is_descendant(target, candidate.source) {
            return candidate.source;
        }

        tree.ancestors(candidate.source)
            .find(|&a| tree.node(a).kind == NodeKind::Compound && tree.is_descendant(target, a))
            .unwrap_or_else(|| tree.root())
    }

    fn exit_set(&self, candidate: &Candidate) -> Result<BTreeSet<NodeId>, CoreError> {
        let Some(label) = candidate.target.as_deref() else {
            return Ok(BTreeSet::new());
        };
        let target = self.resolve(candidate, label)?;
        let domain = self.domain(candidate, target);
        let tree = self.tree();
        Ok(self
            .config
            .iter()
            .copied()
            .filter(|&n| tree.is_descendant(n, domain))
            .collect())
    }

    /// Applies a set of non-conflicting transitions.
    fn microstep(&mut self, selected: &[&'m Candidate]) -> Result<(), CoreError> {
        let tree = self.tree();

        let mut exits: BTreeSet<NodeId> = BTreeSet::new();
        let mut entry: BTreeSet<NodeId> = BTreeSet::new();
        let mut targets: Vec<(NodeId, NodeId)> = Vec::new();
        for candidate in selected {
            if let Some(label) = candidate.target.as_deref() {
                let target = self.resolve(candidate, label)?;
                targets.push((target, self.domain(candidate, target)));
                exits.extend(self.exit_set(candidate)?);
            }
        }

        for &node in &exits {
            if tree.history_children(node).next().is_some() {
                self.history.record(tree, node, &self.config);
            }
        }

        for &node in exits.iter().rev() {
            let state = tree.node(node);
            tracing::trace!("Exit {}", state.id);
            self.actions.extend(state.exit.iter().cloned());
            for (event, _) in state.delayed_events() {
                self.timers.push(TimerCommand::Cancel {
                    key: TimerKey::new(&state.id, event),
                });
            }
            self.config.remove(&node);
        }

        for candidate in selected {
            self.actions.extend(candidate.actions.iter().cloned());
        }

        for (target, domain) in targets {
            self.add_descendants(target, &mut entry);
            self.add_ancestors(target, domain, &mut entry);
        }
        self.enter(entry);

        Ok(())
    }

    /// Enters `node` and its default descendants. History nodes enter their
    /// recorded nodes, or their parent's default descent.
    fn add_descendants(&self, node: NodeId, entry: &mut BTreeSet<NodeId>) {
        let tree = self.tree();
        let state = tree.node(node);

        match state.kind {
            NodeKind::History(_) => {
                let Some(parent) = state.parent else {
                    return;
                };
                match self.history.get(node) {
                    Some(record) if !record.nodes.is_empty() => {
                        // Every recorded node goes in before any parallel
                        // ancestor fills its uncovered regions
                        for &recorded in &record.nodes {
                            self.add_descendants(recorded, entry);
                        }
                        for &recorded in &record.nodes {
                            self.add_ancestors(recorded, parent, entry);
                        }
                    }
                    _ => self.add_default_children(parent, entry),
                }
            }
            _ => {
                entry.insert(node);
                self.add_default_children(node, entry);
            }
        }
    }

    fn add_default_children(&self, node: NodeId, entry: &mut BTreeSet<NodeId>) {
        let tree = self.tree();
        match tree.node(node).kind {
            NodeKind::Compound => {
                if let Some(initial) = tree.initial_child(node) {
                    self.add_descendants(initial, entry);
                }
            }
            NodeKind::Parallel => {
                for region in tree.regions(node) {
                    if !covered(tree, region, entry) {
                        self.add_descendants(region, entry);
                    }
                }
            }
            _ => {}
        }
    }

    /// Enters the proper ancestors of `node` below `domain`, completing the
    /// other regions of any parallel ancestor.
    fn add_ancestors(&self, node: NodeId, domain: NodeId, entry: &mut BTreeSet<NodeId>) {
        let tree = self.tree();
        for ancestor in tree.ancestors(node) {
            if ancestor == domain {
                break;
            }
            entry.insert(ancestor);
            if tree.node(ancestor).kind == NodeKind::Parallel {
                for region in tree.regions(ancestor) {
                    if !covered(tree, region, entry) && !covered(tree, region, &self.config) {
                        self.add_descendants(region, entry);
                    }
                }
            }
        }
    }

    /// Runs entry actions outermost first and raises completion events.
    fn enter(&mut self, entry: BTreeSet<NodeId>) {
        let tree = self.tree();
        let mut finals = Vec::new();

        for node in entry {
            if !self.config.insert(node) {
                continue;
            }
            let state = tree.node(node);
            tracing::trace!("Enter {}", state.id);
            self.actions.extend(state.entry.iter().cloned());
            for (event, delay_ms) in state.delayed_events() {
                self.timers.push(TimerCommand::Arm {
                    key: TimerKey::new(&state.id, event),
                    delay_ms,
                });
            }
            if state.kind == NodeKind::Final {
                finals.push(node);
            }
        }

        for node in finals {
            let Some(parent) = tree.parent(node) else {
                continue;
            };

            match tree.node(parent).kind {
                NodeKind::Parallel => {
                    if self.all_regions_final(parent) {
                        self.complete(parent);
                    }
                }
                _ => {
                    self.complete(parent);
                    if let Some(grandparent) = tree.parent(parent) {
                        if tree.node(grandparent).kind == NodeKind::Parallel
                            && self.all_regions_final(grandparent)
                        {
                            self.complete(grandparent);
                        }
                    }
                }
            }
        }
    }

    fn complete(&mut self, node: NodeId) {
        self.raise_done(node);
        if node == self.tree().root() {
            self.done = true;
        }
    }

    fn all_regions_final(&self, parallel: NodeId) -> bool {
        let tree = self.tree();
        tree.regions(parallel).all(|region| match tree.node(region).kind {
            NodeKind::Final => self.config.contains(&region),
            NodeKind::Parallel => self.all_regions_final(region),
            _ => tree
                .regions(region)
                .any(|c| tree.node(c).kind == NodeKind::Final && self.config.contains(&c)),
        })
    }

    fn raise_done(&mut self, node: NodeId) {
        let event = Event::done(&self.tree().node(node).id);
        if !self.internal.contains(&event) {
            self.internal.push_back(event);
        }
    }

    /// Takes eventless transitions and queued internal events until stable.
    fn settle(&mut self, origin: &Event) -> Result<(), CoreError> {
        let limit = self.machine.transient_limit;
        let mut steps = 0usize;

        loop {
            if self.done {
                break;
            }

            let mut selected = self.select(EVENTLESS, origin)?;
            if selected.is_empty() {
                let Some(internal) = self.internal.pop_front() else {
                    break;
                };
                selected = self.select(&internal.name, &internal)?;
                if selected.is_empty() {
                    continue;
                }
                tracing::debug!("Internal event {}", internal);
            }

            steps += 1;
            if steps > limit {
                tracing::warn!("Transient transitions after {} did not settle within {} steps", origin, limit);
                return Err(CoreError::NonTerminatingTransientCycle {
                    event: origin.name.clone(),
                    limit,
                });
            }
            self.microstep(&selected)?;
        }

        Ok(())
    }

    fn finish(self, event: Event, changed: bool) -> Result<InterpreterState, CoreError> {
        let value = StateValue::from_configuration(self.tree(), &self.config)?;
        tracing::debug!("{} -> {} ({} actions)", event, value, self.actions.len());

        Ok(InterpreterState {
            value,
            context: self.context,
            actions: self.actions,
            event,
            changed,
            done: self.done,
            history: self.history,
            timers: self.timers,
        })
    }
}

/// Returns true if `region` or one of its descendants is in `set`.
fn covered(tree: &StateTree, region: NodeId, set: &BTreeSet<NodeId>) -> bool {
    set.iter()
        .any(|&n| n == region || tree.is_descendant(n, region))
}

/// Owns a machine and its single current state.
#[derive(Debug)]
pub struct Interpreter {
    machine: Machine,
    state: InterpreterState,
    timers: TimerRegistry,
}

impl Interpreter {
    /// Starts a machine in its initial state.
    pub fn new(machine: Machine) -> Result<Self, CoreError> {
        let state = machine.initial_state()?;
        let mut timers = TimerRegistry::new();
        timers.apply(&state.timers, Instant::now());

        tracing::info!("Interpreter started for {} in {}", machine.id(), state.value);

        Ok(Self {
            machine,
            state,
            timers,
        })
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn state(&self) -> &InterpreterState {
        &self.state
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Applies an event and commits the result. On error the state is left
    /// unchanged.
    pub fn send(&mut self, event: impl Into<Event>) -> Result<&InterpreterState, CoreError> {
        let event = event.into();
        let next = self.machine.transition(&self.state, &event).map_err(|e| {
            tracing::warn!("Event {} rejected: {}", event, e);
            e
        })?;

        self.timers.apply(&next.timers, Instant::now());
        self.state = next;
        Ok(&self.state)
    }

    /// Computes the state `event` would produce without committing it.
    pub fn preview(&self, event: impl Into<Event>) -> Result<InterpreterState, CoreError> {
        self.machine.transition(&self.state, &event.into())
    }

    pub fn next_events(&self) -> Result<Vec<String>, CoreError> {
        self.machine.next_events(&self.state)
    }

    pub fn can_handle(&self, event: &str) -> Result<bool, CoreError> {
        self.machine.can_handle(&self.state, event)
    }

    pub fn active_ids(&self) -> BTreeSet<String> {
        self.machine.active_ids(&self.state)
    }

    /// Shallow-merges a JSON object into the context.
    pub fn update_context(&mut self, patch: &Value) -> Result<&InterpreterState, CoreError> {
        if !patch.is_object() {
            return Err(CoreError::transition("context patch must be a JSON object"));
        }
        self.state.context = merge_ctx(&self.state.context, patch);
        Ok(&self.state)
    }

    /// Swaps in a new machine. History, timers and state are reset; on error
    /// the current machine stays active.
    pub fn replace_machine(&mut self, machine: Machine) -> Result<&InterpreterState, CoreError> {
        let state = machine.initial_state()?;

        tracing::info!(
            "Machine {} replaced by {} (checksum {})",
            self.machine.id(),
            machine.id(),
            machine.definition().checksum
        );

        self.timers.clear();
        self.timers.apply(&state.timers, Instant::now());
        self.machine = machine;
        self.state = state;
        Ok(&self.state)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Armed timers whose deadline has passed, earliest first.
    pub fn due_timers(&self, now: Instant) -> Vec<TimerKey> {
        self.timers.due(now)
    }

    /// Delivers a timer's event through [`Interpreter::send`]. Returns `None`
    /// if the timer is no longer armed.
    pub fn fire_timer(&mut self, key: &TimerKey) -> Result<Option<&InterpreterState>, CoreError> {
        if !self.timers.cancel(key) {
            return Ok(None);
        }
        tracing::debug!("Timer {} fired", key);
        self.send(Event::new(key.event.clone())).map(Some)
    }
}

/// Shallow merge of `payload` into `ctx`.
fn merge_ctx(ctx: &Value, payload: &Value) -> Value {
    match (ctx, payload) {
        (Value::Object(ctx_map), Value::Object(payload_map)) => {
            let mut result = ctx_map.clone();
            for (k, v) in payload_map {
                result.insert(k.clone(), v.clone());
            }
            Value::Object(result)
        }
        _ => payload.clone(),
    }
}
