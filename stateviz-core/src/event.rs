//! Events delivered to the interpreter.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the eventless (transient) event.
pub const EVENTLESS: &str = "";

const AFTER_PREFIX: &str = "xstate.after(";
const DONE_PREFIX: &str = "done.state.";

/// An event with an optional JSON payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    /// Event name. The empty string is the eventless event.
    pub name: String,

    /// Event data, visible to guards as `event.*`.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// The synthetic event raised when a delayed transition elapses.
    pub fn after(delay_ms: u64, node_id: &str) -> Self {
        Self::new(after_event_name(delay_ms, node_id))
    }

    /// The synthetic completion event of a compound or parallel node.
    pub fn done(node_id: &str) -> Self {
        Self::new(done_event_name(node_id))
    }

    pub fn is_eventless(&self) -> bool {
        self.name.is_empty()
    }
}

impl From<&str> for Event {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Event {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str("(eventless)")
        } else {
            f.write_str(&self.name)
        }
    }
}

/// Builds the name of a delayed event: `xstate.after(1000)#light.green`.
pub fn after_event_name(delay_ms: u64, node_id: &str) -> String {
    format!("{AFTER_PREFIX}{delay_ms})#{node_id}")
}

/// Builds the name of a completion event: `done.state.light.red`.
pub fn done_event_name(node_id: &str) -> String {
    format!("{DONE_PREFIX}{node_id}")
}

/// Extracts the delay from a delayed event name.
pub fn parse_after_delay(name: &str) -> Option<u64> {
    let rest = name.strip_prefix(AFTER_PREFIX)?;
    let end = rest.find(')')?;
    rest[..end].parse().ok()
}

/// Returns true for completion events.
pub fn is_done_event(name: &str) -> bool {
    name.starts_with(DONE_PREFIX)
}
