//! Machine definition types.
//!
//! Machine definitions use a nested JSON format:
//!
//! ```json
//! {
//!   "id": "light",
//!   "initial": "green",
//!   "context": { "count": 0 },
//!   "states": {
//!     "green":  { "on": { "TIMER": "yellow" } },
//!     "yellow": { "on": { "TIMER": { "target": "red", "cond": "ctx.count > 0" } } },
//!     "red": {
//!       "initial": "walk",
//!       "on": { "TIMER": "green" },
//!       "states": { "walk": { "on": { "PED": "stop" } }, "stop": {} }
//!     }
//!   }
//! }
//! ```
//!
//! Key order in `states` and `on` is significant: it is document order, which
//! decides parallel region order and transition priority.

use crate::error::CoreError;
use crate::guard::Guard;
use crate::tree::{Action, HistoryKind, StateTree};
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Root id used when a definition names neither `id` nor `key`.
pub const DEFAULT_MACHINE_ID: &str = "machine";

/// Keys that mark a JSON object as a single transition object rather than a
/// legacy `{ "<target>": { ... } }` map.
const TRANSITION_OBJECT_KEYS: &[&str] = &["target", "cond", "guard", "actions", "internal"];

/// Explicit node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    Atomic,
    Compound,
    Parallel,
    Final,
    History,
}

/// `history: true | "shallow" | "deep"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HistoryConfig {
    Flag(bool),
    Kind(HistoryKind),
}

impl HistoryConfig {
    pub fn kind(self) -> Option<HistoryKind> {
        match self {
            HistoryConfig::Flag(true) => Some(HistoryKind::Shallow),
            HistoryConfig::Flag(false) => None,
            HistoryConfig::Kind(kind) => Some(kind),
        }
    }
}

/// Raw state node as written in a definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateConfig {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub key: Option<String>,

    #[serde(default)]
    pub initial: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: Option<StateType>,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default)]
    pub history: Option<HistoryConfig>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub states: Vec<(String, StateConfig)>,

    #[serde(default, deserialize_with = "ordered_map")]
    pub on: Vec<(String, TransitionConfig)>,

    /// Delayed transitions keyed by milliseconds.
    #[serde(default, deserialize_with = "ordered_map")]
    pub after: Vec<(String, TransitionConfig)>,

    #[serde(default)]
    pub on_done: Option<TransitionConfig>,

    #[serde(default, alias = "entry")]
    pub on_entry: ActionList,

    #[serde(default, alias = "exit")]
    pub on_exit: ActionList,

    /// Initial context; only read on the root node.
    #[serde(default)]
    pub context: Option<Value>,
}

/// Ordered action names: `"a"`, `{ "type": "a" }` or an array of either.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionList(pub Vec<Action>);

#[derive(Deserialize)]
#[serde(untagged)]
enum ActionItem {
    Name(String),
    Object {
        #[serde(rename = "type")]
        kind: String,
    },
}

impl From<ActionItem> for Action {
    fn from(item: ActionItem) -> Self {
        match item {
            ActionItem::Name(name) | ActionItem::Object { kind: name } => Action::new(name),
        }
    }
}

impl<'de> Deserialize<'de> for ActionList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(ActionItem),
            Many(Vec<ActionItem>),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::One(item) => ActionList(vec![item.into()]),
            Raw::Many(items) => ActionList(items.into_iter().map(Action::from).collect()),
        })
    }
}

/// Guard as written: an expression / name string or `{ "type": "name" }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GuardConfig {
    Source(String),
    Named {
        #[serde(rename = "type")]
        name: String,
    },
}

impl GuardConfig {
    pub fn parse(&self) -> Result<Guard, CoreError> {
        match self {
            GuardConfig::Source(source) => Guard::parse(source),
            GuardConfig::Named { name } => Ok(Guard::named(name.clone())),
        }
    }
}

/// One candidate transition as written.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CandidateConfig {
    #[serde(default)]
    pub target: Option<String>,

    #[serde(default, alias = "guard")]
    pub cond: Option<GuardConfig>,

    #[serde(default)]
    pub actions: ActionList,
}

impl CandidateConfig {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }
}

/// Ordered candidate list for one event.
///
/// Accepts a target string, a transition object, an array of transition
/// objects (or strings), or the legacy target-keyed map
/// `{ "loading": { "cond": "...", "actions": [...] } }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionConfig(pub Vec<CandidateConfig>);

impl<'de> Deserialize<'de> for TransitionConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TransitionVisitor;

        impl<'de> Visitor<'de> for TransitionVisitor {
            type Value = TransitionConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a target string, a transition object or an array of them")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(TransitionConfig(vec![target_candidate(v)]))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(TransitionConfig::default())
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Item {
                    Target(String),
                    Object(CandidateConfig),
                }

                let mut candidates = Vec::new();
                while let Some(item) = seq.next_element::<Item>()? {
                    candidates.push(match item {
                        Item::Target(target) => target_candidate(&target),
                        Item::Object(candidate) => candidate,
                    });
                }
                Ok(TransitionConfig(candidates))
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let object = serde_json::Map::<String, Value>::deserialize(
                    de::value::MapAccessDeserializer::new(map),
                )?;

                if object
                    .keys()
                    .any(|k| TRANSITION_OBJECT_KEYS.contains(&k.as_str()))
                {
                    let candidate = serde_json::from_value(Value::Object(object))
                        .map_err(de::Error::custom)?;
                    return Ok(TransitionConfig(vec![candidate]));
                }

                let mut candidates = Vec::with_capacity(object.len());
                for (target, config) in object {
                    let mut candidate: CandidateConfig = if config.is_null() {
                        CandidateConfig::default()
                    } else {
                        serde_json::from_value(config).map_err(de::Error::custom)?
                    };
                    candidate.target = Some(target);
                    candidates.push(candidate);
                }
                Ok(TransitionConfig(candidates))
            }
        }

        deserializer.deserialize_any(TransitionVisitor)
    }
}

fn target_candidate(target: &str) -> CandidateConfig {
    if target.is_empty() {
        CandidateConfig::default()
    } else {
        CandidateConfig::to(target)
    }
}

/// Deserializes a JSON object into entries in document order, keeping
/// duplicate keys so they can be reported.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T> Visitor<'de> for OrderedVisitor<T>
    where
        T: Deserialize<'de>,
    {
        type Value = Vec<(String, T)>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an object")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry::<String, T>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}

/// Validated and indexed machine definition.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    /// Machine id (the root node id).
    pub name: String,

    /// Static state tree.
    pub tree: StateTree,

    /// Initial context for new interpreters.
    pub context: Value,

    /// Original raw definition for round-tripping.
    pub raw: Value,

    /// Hash of the definition for change detection.
    pub checksum: String,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON text.
    ///
    /// Prefer this over [`MachineDefinition::from_json`]: parsing text keeps
    /// duplicate keys visible to validation.
    pub fn from_str(json: &str) -> Result<Self, CoreError> {
        let config: StateConfig = serde_json::from_str(json)?;
        let raw: Value = serde_json::from_str(json)?;
        Self::from_config(config, raw)
    }

    /// Parses and validates a machine definition from a JSON value.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let config: StateConfig = serde_json::from_value(json.clone())?;
        Self::from_config(config, json.clone())
    }

    /// Builds a definition from an already deserialized config.
    pub fn from_config(config: StateConfig, raw: Value) -> Result<Self, CoreError> {
        let name = config
            .id
            .clone()
            .or_else(|| config.key.clone())
            .unwrap_or_else(|| DEFAULT_MACHINE_ID.to_string());

        let context = match &config.context {
            None => Value::Object(Default::default()),
            Some(ctx @ Value::Object(_)) => ctx.clone(),
            Some(_) => return Err(CoreError::definition("context must be a JSON object")),
        };

        let tree = StateTree::build(&name, &config)?;

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        tracing::debug!(
            "Loaded machine definition {} ({} nodes, checksum {})",
            name,
            tree.len(),
            checksum
        );

        Ok(Self {
            name,
            tree,
            context,
            raw,
            checksum,
        })
    }

    /// Every event handled somewhere in the machine, in document order,
    /// without duplicates or the eventless event.
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        for node in self.tree.iter() {
            for event in node.events() {
                if !event.is_empty() && !events.contains(&event) {
                    events.push(event);
                }
            }
        }
        events
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Value {
        self.raw.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    fn gallery() -> &'static str {
        r#"{
            "initial": "start",
            "states": {
                "start": { "on": { "SEARCH": { "loading": { "cond": "canDo" } } } },
                "loading": {
                    "onEntry": ["search"],
                    "on": {
                        "SEARCH_SUCCESS": { "gallery": { "actions": ["updateItems"] } },
                        "SEARCH_FAILURE": "error",
                        "CANCEL_SEARCH": "gallery"
                    }
                },
                "error": { "on": { "SEARCH": "loading" } },
                "gallery": { "on": { "SEARCH": "loading", "SELECT_PHOTO": "photo" } },
                "photo": { "onEntry": "setPhoto", "on": { "EXIT_PHOTO": "gallery" } }
            }
        }"#
    }

    #[test]
    fn test_parse_definition() {
        let def = MachineDefinition::from_str(gallery()).unwrap();

        assert_eq!(def.name, DEFAULT_MACHINE_ID);
        assert_eq!(def.tree.len(), 6);
        assert_eq!(def.context, serde_json::json!({}));
        assert!(!def.checksum.is_empty());

        let root = def.tree.node(def.tree.root());
        assert_eq!(root.kind, NodeKind::Compound);
        assert_eq!(root.initial.as_deref(), Some("start"));
    }

    #[test]
    fn test_legacy_target_map() {
        let def = MachineDefinition::from_str(gallery()).unwrap();
        let start = def.tree.lookup("machine.start").unwrap();
        let candidates = def.tree.node(start).candidates("SEARCH");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].target.as_deref(), Some("loading"));
        assert_eq!(candidates[0].guard.as_ref().unwrap().label(), "canDo");

        let loading = def.tree.lookup("machine.loading").unwrap();
        let success = &def.tree.node(loading).candidates("SEARCH_SUCCESS")[0];
        assert_eq!(success.actions, vec![Action::new("updateItems")]);
        assert_eq!(def.tree.node(loading).entry, vec![Action::new("search")]);
    }

    #[test]
    fn test_events_in_document_order() {
        let def = MachineDefinition::from_str(gallery()).unwrap();
        assert_eq!(
            def.events(),
            vec![
                "SEARCH",
                "SEARCH_SUCCESS",
                "SEARCH_FAILURE",
                "CANCEL_SEARCH",
                "SELECT_PHOTO",
                "EXIT_PHOTO"
            ]
        );
    }

    #[test]
    fn test_transition_forms() {
        let json = r#"{
            "id": "m",
            "initial": "a",
            "states": {
                "a": {
                    "on": {
                        "ONE": "b",
                        "OBJ": { "target": "b", "guard": "ctx.ok", "actions": "log" },
                        "MANY": [ { "target": "b", "cond": { "type": "isReady" } }, "a" ],
                        "ACT": { "actions": [ { "type": "notify" } ] }
                    }
                },
                "b": {}
            }
        }"#;
        let def = MachineDefinition::from_str(json).unwrap();
        let a = def.tree.node(def.tree.lookup("m.a").unwrap());

        assert_eq!(a.candidates("ONE")[0].target.as_deref(), Some("b"));
        assert_eq!(a.candidates("OBJ")[0].guard.as_ref().unwrap().label(), "ctx.ok");
        assert_eq!(a.candidates("OBJ")[0].actions, vec![Action::new("log")]);

        let many = a.candidates("MANY");
        assert_eq!(many.len(), 2);
        assert_eq!(many[0].guard.as_ref().unwrap().label(), "isReady");
        assert_eq!(many[1].target.as_deref(), Some("a"));

        let act = &a.candidates("ACT")[0];
        assert!(act.target.is_none());
        assert_eq!(act.actions, vec![Action::new("notify")]);
    }

    #[test]
    fn test_round_trip_raw() {
        let def = MachineDefinition::from_str(gallery()).unwrap();
        let again = MachineDefinition::from_json(&def.to_json()).unwrap();
        assert_eq!(def.checksum, again.checksum);
        assert_eq!(def.tree.len(), again.tree.len());
    }

    #[test]
    fn test_context_must_be_object() {
        let json = r#"{ "initial": "a", "context": 3, "states": { "a": {} } }"#;
        let result = MachineDefinition::from_str(json);
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_malformed_json() {
        let result = MachineDefinition::from_str("{ \"states\": ");
        assert!(matches!(result, Err(CoreError::Json(_))));
    }
}
