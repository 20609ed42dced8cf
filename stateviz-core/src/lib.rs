//! # stateviz-core
//!
//! Statechart engine for stateviz.
//!
//! This crate provides:
//! - Machine definition parsing and validation
//! - The static state tree (hierarchical, parallel, history and final nodes)
//! - Guard expression evaluation
//! - State values and active-id resolution
//! - The interpreter: transitions, transient and delayed transitions,
//!   history and completion events

pub mod definition;
pub mod error;
pub mod event;
pub mod guard;
pub mod history;
pub mod interpreter;
pub mod state;
pub mod timer;
pub mod tree;
pub mod value;

pub use definition::MachineDefinition;
pub use error::CoreError;
pub use event::Event;
pub use guard::{Guard, GuardEvaluator, GuardExpr};
pub use history::{HistoryRecord, HistoryStore};
pub use interpreter::{Interpreter, Machine, DEFAULT_TRANSIENT_LIMIT};
pub use state::InterpreterState;
pub use timer::{TimerCommand, TimerKey, TimerRegistry};
pub use tree::{Action, Candidate, HistoryKind, NodeId, NodeKind, StateNode, StateTree};
pub use value::{active_ids, StateValue};
