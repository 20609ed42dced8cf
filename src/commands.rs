//! One-shot command execution.

use crate::Commands;
use colored::Colorize;
use serde_json::Value;
use stateviz_core::{Event, Interpreter, InterpreterState, Machine, MachineDefinition, NodeKind};
use stateviz_runtime::Config;
use stateviz_view::extract;

/// Executes a command and returns the formatted output.
pub fn execute(
    definition: MachineDefinition,
    cmd: Commands,
    config: &Config,
) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl => unreachable!(),

        Commands::Validate => {
            let tree = &definition.tree;
            let count = |pred: fn(&NodeKind) -> bool| tree.iter().filter(|n| pred(&n.kind)).count();

            Ok(format!(
                "{} machine {} (checksum: {})\n  States: {}\n  Parallel: {}\n  Final: {}\n  History: {}\n  Events: {}",
                "Valid".green(),
                definition.name.cyan(),
                definition.checksum,
                tree.len(),
                count(|k| matches!(k, NodeKind::Parallel)),
                count(|k| matches!(k, NodeKind::Final)),
                count(NodeKind::is_history),
                definition.events().join(", ")
            ))
        }

        Commands::Graph => {
            let graph = extract(&definition.tree);
            Ok(serde_json::to_string_pretty(&graph)?)
        }

        Commands::Ids => {
            let machine = Machine::new(definition);
            let state = machine.initial_state()?;
            Ok(machine
                .active_ids(&state)
                .into_iter()
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Run { events, json } => {
            let machine = Machine::new(definition)
                .with_transient_limit(config.interpreter.transient_limit);
            let mut interpreter = Interpreter::new(machine)?;

            let mut lines = Vec::with_capacity(events.len() + 1);
            lines.push(format_step(interpreter.state(), json)?);

            for arg in &events {
                let event = parse_event_arg(arg)?;
                let state = interpreter.send(event)?;
                lines.push(format_step(state, json)?);
            }

            Ok(lines.join("\n"))
        }
    }
}

/// Parses `NAME` or `NAME=PAYLOAD_JSON`.
pub fn parse_event_arg(arg: &str) -> Result<Event, Box<dyn std::error::Error>> {
    match arg.split_once('=') {
        Some((name, payload)) => {
            let payload: Value = serde_json::from_str(payload)?;
            Ok(Event::with_payload(name, payload))
        }
        None => Ok(Event::new(arg)),
    }
}

/// One line per step: `EVENT -> value [actions]`.
pub fn format_step(state: &InterpreterState, json: bool) -> Result<String, Box<dyn std::error::Error>> {
    if json {
        return Ok(serde_json::to_string(state)?);
    }

    let mut line = format!("{} {} {}", state.event.name.cyan(), "->".dimmed(), state.value.to_string().yellow());
    if !state.actions.is_empty() {
        let actions: Vec<&str> = state.actions.iter().map(|a| a.name()).collect();
        line.push_str(&format!(" [{}]", actions.join(", ")));
    }
    if !state.changed {
        line.push_str(&format!(" {}", "(unchanged)".dimmed()));
    }
    if state.done {
        line.push_str(&format!(" {}", "(done)".green()));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHT: &str = r#"{
        "id": "light",
        "initial": "green",
        "states": {
            "green": { "on": { "TIMER": "yellow" } },
            "yellow": { "on": { "TIMER": { "target": "red", "cond": "event.force", "actions": "honk" } } },
            "red": { "type": "final" }
        }
    }"#;

    fn run(events: &[&str]) -> String {
        colored::control::set_override(false);
        let definition = MachineDefinition::from_str(LIGHT).unwrap();
        let cmd = Commands::Run {
            events: events.iter().map(|e| e.to_string()).collect(),
            json: false,
        };
        execute(definition, cmd, &Config::default()).unwrap()
    }

    #[test]
    fn test_parse_event_arg() {
        let event = parse_event_arg("GO").unwrap();
        assert_eq!(event.name, "GO");

        let event = parse_event_arg(r#"GO={"force":true}"#).unwrap();
        assert_eq!(event.name, "GO");
        assert_eq!(event.payload["force"], Value::Bool(true));

        assert!(parse_event_arg("GO={").is_err());
    }

    #[test]
    fn test_run() {
        let output = run(&["TIMER", "TIMER", r#"TIMER={"force":true}"#]);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "xstate.init -> green");
        assert_eq!(lines[1], "TIMER -> yellow");
        assert_eq!(lines[2], "TIMER -> yellow (unchanged)");
        assert_eq!(lines[3], "TIMER -> red [honk] (done)");
    }

    #[test]
    fn test_demo_machines() {
        colored::control::set_override(false);
        let light = MachineDefinition::from_str(include_str!("../demos/light.json")).unwrap();
        let ids = execute(light, Commands::Ids, &Config::default()).unwrap();
        assert_eq!(ids, "light.green");

        let player = MachineDefinition::from_str(include_str!("../demos/player.json")).unwrap();
        let cmd = Commands::Run {
            events: vec!["POWER".to_string(), "PLAY".to_string(), "POWER".to_string(), "POWER".to_string()],
            json: false,
        };
        let output = execute(player, cmd, &Config::default()).unwrap();
        let last = output.lines().last().unwrap();
        assert!(last.contains(r#""playback":"playing""#), "{}", last);
    }

    #[test]
    fn test_ids_and_graph() {
        let definition = MachineDefinition::from_str(LIGHT).unwrap();
        let ids = execute(definition.clone(), Commands::Ids, &Config::default()).unwrap();
        assert_eq!(ids, "light.green");

        let graph = execute(definition, Commands::Graph, &Config::default()).unwrap();
        let graph: Value = serde_json::from_str(&graph).unwrap();
        assert!(graph["edges"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["id"] == "light.green:light.yellow::TIMER"));
    }
}
