//! # stateviz-view
//!
//! View model for stateviz.
//!
//! - [`graph`]: static node and edge lists extracted from a state tree
//! - [`sync`]: active / preview / highlight / disabled marker overlay
//! - [`routing`]: connector geometry for laid-out boxes

pub mod graph;
pub mod routing;
pub mod sync;

pub use graph::{extract, friendly_event_name, EdgeKind, EdgeView, Graph, NodeRole, NodeView};
pub use routing::{bezier_path, route, svg_path, Point, Rect};
pub use sync::{Marker, MarkerDelta, MarkerSet, ViewSynchronizer};
