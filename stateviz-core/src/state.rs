//! Interpreter state snapshots.

use crate::event::Event;
use crate::history::HistoryStore;
use crate::timer::TimerCommand;
use crate::tree::Action;
use crate::value::StateValue;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// The state owned by an interpreter, replaced wholesale on each step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterpreterState {
    /// Current configuration.
    pub value: StateValue,

    /// Extended state, visible to guards as `ctx.*`.
    pub context: Value,

    /// Actions executed by the last step, in execution order.
    pub actions: Vec<Action>,

    /// Event that produced this state.
    pub event: Event,

    /// Whether the last event selected any transition.
    pub changed: bool,

    /// Whether a top-level final state has been reached.
    pub done: bool,

    /// History records.
    #[serde(skip_serializing_if = "HistoryStore::is_empty")]
    pub history: HistoryStore,

    /// Timers armed and cancelled by the last step.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub timers: Vec<TimerCommand>,
}

impl InterpreterState {
    /// Active leaf ids under the machine id.
    pub fn active_ids(&self, machine_id: &str) -> BTreeSet<String> {
        self.value.active_ids(machine_id)
    }

    /// Returns true if the configuration includes the dotted path.
    pub fn matches(&self, path: &str) -> bool {
        self.value.matches(path)
    }

    /// Copy of this state as the result of an event that selected nothing.
    pub(crate) fn unchanged(&self, event: &Event) -> Self {
        Self {
            value: self.value.clone(),
            context: self.context.clone(),
            actions: Vec::new(),
            event: event.clone(),
            changed: false,
            done: self.done,
            history: self.history.clone(),
            timers: Vec::new(),
        }
    }
}
