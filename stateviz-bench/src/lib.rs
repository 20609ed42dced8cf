//! Shared machine fixtures for the benchmarks.

use serde_json::{json, Value};

/// Three-light cycle.
pub fn traffic_light() -> Value {
    json!({
        "id": "light",
        "initial": "green",
        "context": { "cycles": 0 },
        "states": {
            "green": { "on": { "TIMER": "yellow" } },
            "yellow": { "on": { "TIMER": "red" } },
            "red": {
                "initial": "walk",
                "on": { "TIMER": "green" },
                "states": {
                    "walk": { "on": { "PED_COUNTDOWN": "wait" } },
                    "wait": { "on": { "PED_COUNTDOWN": "stop" } },
                    "stop": {}
                }
            }
        }
    })
}

/// `regions` parallel regions, each a ring of `width` states advanced by
/// `NEXT`, with a deep history node in every region.
pub fn parallel_rings(regions: usize, width: usize) -> Value {
    let mut region_states = serde_json::Map::new();
    for r in 0..regions {
        let mut states = serde_json::Map::new();
        for s in 0..width {
            let next = format!("s{}", (s + 1) % width);
            states.insert(
                format!("s{}", s),
                json!({
                    "on": {
                        "NEXT": [
                            { "target": next, "cond": "ctx.enabled" },
                            { "actions": "blocked" }
                        ]
                    }
                }),
            );
        }
        states.insert("hist".to_string(), json!({ "history": "deep" }));
        region_states.insert(
            format!("r{}", r),
            json!({ "initial": "s0", "states": states }),
        );
    }

    json!({
        "id": "rings",
        "initial": "running",
        "context": { "enabled": true },
        "states": {
            "running": {
                "type": "parallel",
                "on": { "PAUSE": "paused" },
                "states": region_states
            },
            "paused": { "on": { "RESUME": "running" } }
        }
    })
}

/// A chain of `depth` nested compound states.
pub fn deep_chain(depth: usize) -> Value {
    let mut node = json!({ "on": { "RESET": "#deep" } });
    for level in (0..depth).rev() {
        let mut states = serde_json::Map::new();
        states.insert(format!("n{}", level), node);
        node = json!({ "initial": format!("n{}", level), "states": states });
    }
    node["id"] = json!("deep");
    node
}
