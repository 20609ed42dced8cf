//! Edge routing between laid-out node boxes.
//!
//! Transition edges start at the right edge of their event label (the
//! "anchor") and end at the target box. Coordinates grow rightwards and
//! downwards.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Horizontal inset of the start point from the anchor's right edge.
const START_INSET: f64 = 5.0;
/// Gap between the end point and the target's left edge.
const END_GAP: f64 = 4.0;
/// Vertical clearance of detours below the source and target boxes.
const DETOUR_CLEARANCE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box of a laid-out node or label.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn left(&self) -> f64 {
        self.x
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Routes a transition edge from `source`'s event `anchor` to `target`.
///
/// By default the edge runs from the anchor to the target's lower-left
/// corner, or straight across when the anchor is level with the target.
/// A level target lying to the left of the anchor is reached by a detour
/// below the source box and up into the target's bottom edge.
pub fn route(source: &Rect, anchor: &Rect, target: &Rect) -> Vec<Point> {
    let anchor_center = anchor.center();
    let mut start = Point::new(anchor.right() - START_INSET, anchor_center.y + 1.0);
    let mut end = Point::new(target.left() - END_GAP, target.bottom());
    let mut midpoints = Vec::new();

    if start.y > target.top() && start.y < target.bottom() {
        end.y = start.y;
        if start.x > end.x {
            start = Point::new(anchor.right() - 8.0, anchor_center.y + 4.0);
            midpoints.push(Point::new(start.x, source.bottom() + DETOUR_CLEARANCE));
            midpoints.push(Point::new(
                target.right() - DETOUR_CLEARANCE,
                target.bottom() + DETOUR_CLEARANCE,
            ));
            end = Point::new(target.right() - DETOUR_CLEARANCE, target.bottom() + END_GAP);
        }
    }

    let mut points = Vec::with_capacity(midpoints.len() + 2);
    points.push(start);
    points.extend(midpoints);
    points.push(end);
    points
}

/// Renders a routed polyline as SVG path data. The first point is raised by
/// one unit so the stroke sits on the anchor's baseline.
pub fn svg_path(points: &[Point]) -> String {
    let mut path = String::new();
    let Some((first, rest)) = points.split_first() else {
        return path;
    };

    let _ = write!(path, "M{} {}", first.x, first.y - 1.0);
    for point in rest {
        let _ = write!(path, " L {},{}", point.x, point.y);
    }
    path
}

/// Cubic connector with horizontal tangents, used for initial pointers.
pub fn bezier_path(from: Point, to: Point) -> String {
    format!(
        "M{},{} C{},{} {},{} {},{}",
        from.x,
        from.y,
        from.x + 100.0,
        from.y,
        to.x - 100.0,
        to.y,
        to.x,
        to.y
    )
}
