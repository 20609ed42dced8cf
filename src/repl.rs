//! Interactive REPL.

use crate::commands::{format_step, parse_event_arg};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use serde_json::Value;
use stateviz_core::{Machine, MachineDefinition};
use stateviz_runtime::{Config, ServiceHandle, SnapshotCause, SnapshotFilter};
use stateviz_view::{extract, EdgeKind, Marker, MarkerDelta, ViewSynchronizer};
use std::path::{Path, PathBuf};

const HELP_TEXT: &str = r#"
Available commands:
  help                          Show this help

  send <event> [payload]        Send an event (alias: s)
  preview <event> [payload]     Show what an event would do, without sending it
  state                         Show the full current state
  ids                           Show the active state ids
  events                        Show the events enabled right now
  ctx [patch]                   Show the context, or merge a JSON object into it
  history                       Show recorded history
  graph                         Show the state tree with markers
  load <file>                   Replace the machine with a definition file

  quit, exit                    Exit the REPL
"#;

struct Session {
    handle: ServiceHandle,
    definition: MachineDefinition,
    view: ViewSynchronizer,
}

pub async fn run(
    definition: MachineDefinition,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "stateviz".bold().cyan());

    let machine = Machine::new(definition.clone());
    let (handle, task) = stateviz_runtime::spawn(machine, config)?;

    // Delayed transitions fire in the background; report them as they land
    let mut timer_rx = handle.subscribe(SnapshotFilter {
        causes: vec![SnapshotCause::Timer],
        ..Default::default()
    });
    tokio::spawn(async move {
        while let Some(snapshot) = timer_rx.recv().await {
            let line = format_step(&snapshot.state, false).unwrap_or_default();
            println!("\n{} {}", "[timer]".magenta(), line);
        }
    });

    let mut session = Session {
        view: ViewSynchronizer::new(extract(&definition.tree)),
        definition,
        handle,
    };
    session.refresh().await?;

    println!(
        "Machine {} loaded ({} states). Type 'help' for available commands.\n",
        session.definition.name.cyan(),
        session.definition.tree.len()
    );

    let rl_config = rustyline::Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(rl_config)?;

    let history_path = history_path(config);
    let _ = rl.load_history(&history_path);

    loop {
        let prompt = format!("{} ", format!("{}>", session.definition.name).cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match session.execute(line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    session.handle.shutdown().await?;
    let _ = task.await;

    Ok(())
}

fn history_path(config: &Config) -> PathBuf {
    config.inspector.history_file.clone().unwrap_or_else(|| {
        home::home_dir()
            .map(|h| h.join(".stateviz_history"))
            .unwrap_or_else(|| ".stateviz_history".into())
    })
}

impl Session {
    async fn execute(&mut self, line: &str) -> Result<Option<String>, Box<dyn std::error::Error>> {
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        // Timers may have fired since the last command
        self.refresh().await?;

        match cmd.as_str() {
            "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

            "quit" | "exit" | "q" => Ok(None),

            "send" | "s" => {
                if rest.is_empty() {
                    return Ok(Some("Usage: send <event> [payload_json]".to_string()));
                }
                let snapshot = self.handle.send(parse_repl_event(rest)?).await?;
                let delta = self.sync(&snapshot.active_ids, &snapshot.next_events);

                let mut output = format_step(&snapshot.state, false)?;
                if !delta.is_empty() {
                    output.push('\n');
                    output.push_str(&format_delta(&delta));
                }
                Ok(Some(output))
            }

            "preview" | "p" => {
                if rest.is_empty() {
                    return Ok(Some("Usage: preview <event> [payload_json]".to_string()));
                }
                let event = parse_repl_event(rest)?;
                let preview = self.handle.preview(event.clone()).await?;

                self.view.sync_preview(&event.name, &preview.active_ids);
                let highlighted: Vec<String> = self
                    .view
                    .marked(Marker::Highlight)
                    .into_iter()
                    .filter_map(|id| self.view.graph().edge(id))
                    .map(|edge| format!("  {} -> {}", edge.source, edge.target.yellow()))
                    .collect();
                self.view.clear_preview();

                let mut output = format_step(&preview.state, false)?;
                output.push_str(&format!("\n  Would be active: {}", preview.active_ids.join(", ")));
                if !highlighted.is_empty() {
                    output.push('\n');
                    output.push_str(&highlighted.join("\n"));
                }
                Ok(Some(output))
            }

            "state" => {
                let snapshot = self.handle.snapshot().await?;
                Ok(Some(serde_json::to_string_pretty(&snapshot.state)?))
            }

            "ids" => {
                let snapshot = self.handle.snapshot().await?;
                Ok(Some(snapshot.active_ids.join("\n")))
            }

            "events" | "e" => {
                let snapshot = self.handle.snapshot().await?;
                if snapshot.next_events.is_empty() {
                    return Ok(Some("No enabled events".yellow().to_string()));
                }
                let disabled = self.view.marked(Marker::Disabled).len();
                Ok(Some(format!(
                    "{}\n  ({} transition edges disabled)",
                    snapshot.next_events.join(", ").cyan(),
                    disabled
                )))
            }

            "ctx" => {
                if rest.is_empty() {
                    let snapshot = self.handle.snapshot().await?;
                    return Ok(Some(serde_json::to_string_pretty(&snapshot.state.context)?));
                }
                let patch: Value = serde_json::from_str(rest)?;
                let snapshot = self.handle.update_context(patch).await?;
                self.sync(&snapshot.active_ids, &snapshot.next_events);
                Ok(Some(serde_json::to_string_pretty(&snapshot.state.context)?))
            }

            "history" | "h" => {
                let snapshot = self.handle.snapshot().await?;
                let tree = &self.definition.tree;
                if snapshot.state.history.is_empty() {
                    return Ok(Some("No history recorded".yellow().to_string()));
                }

                let mut output = String::new();
                for (node, record) in snapshot.state.history.iter() {
                    let nodes: Vec<&str> = record.nodes.iter().map(|&n| tree.node(n).id.as_str()).collect();
                    output.push_str(&format!(
                        "  {} ({:?}): {}\n",
                        tree.node(node).id.cyan(),
                        record.kind,
                        nodes.join(", ")
                    ));
                }
                Ok(Some(output))
            }

            "graph" | "g" => Ok(Some(self.format_graph())),

            "load" => {
                if rest.is_empty() {
                    return Ok(Some("Usage: load <file>".to_string()));
                }
                let definition = crate::load_definition(Path::new(rest))?;
                let snapshot = self.handle.load(definition.clone()).await?;

                self.view.set_graph(extract(&definition.tree));
                self.definition = definition;
                self.sync(&snapshot.active_ids, &snapshot.next_events);

                Ok(Some(format!(
                    "{} machine {} (checksum: {})\n{}",
                    "Loaded".green(),
                    snapshot.machine.cyan(),
                    snapshot.checksum,
                    format_step(&snapshot.state, false)?
                )))
            }

            _ => Ok(Some(format!(
                "Unknown command: {}. Type 'help' for help.",
                cmd
            ))),
        }
    }

    async fn refresh(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let snapshot = self.handle.snapshot().await?;
        self.sync(&snapshot.active_ids, &snapshot.next_events);
        Ok(())
    }

    fn sync(&mut self, active_ids: &[String], next_events: &[String]) -> MarkerDelta {
        let delta = self.view.sync_active(active_ids);
        self.view.sync_enabled(next_events);
        delta
    }

    fn format_graph(&self) -> String {
        let graph = self.view.graph();
        let mut output = String::new();

        for node in graph.nodes.iter().filter(|n| !n.is_initial_marker()) {
            let indent = "  ".repeat(node.depth + 1);
            let name = if self.view.has(&node.id, Marker::Active) {
                node.key.green().bold().to_string()
            } else {
                node.key.normal().to_string()
            };
            output.push_str(&format!("{}{}\n", indent, name));

            for edge in graph.edges_from(&node.id).filter(|e| e.kind == EdgeKind::Transition) {
                let label = edge.label.replace('\n', " ");
                let line = format!("{}  {} -> {}", indent, label, edge.target);
                if self.view.has(&edge.id, Marker::Disabled) {
                    output.push_str(&format!("{}\n", line.dimmed()));
                } else {
                    output.push_str(&format!("{}\n", line.cyan()));
                }
            }
        }

        output
    }
}

/// REPL events are `NAME [PAYLOAD_JSON]`.
fn parse_repl_event(rest: &str) -> Result<stateviz_core::Event, Box<dyn std::error::Error>> {
    match rest.split_once(char::is_whitespace) {
        Some((name, payload)) => parse_event_arg(&format!("{}={}", name, payload.trim())),
        None => parse_event_arg(rest),
    }
}

fn format_delta(delta: &MarkerDelta) -> String {
    let removed = delta
        .removed
        .iter()
        .filter(|(_, marker)| *marker == Marker::Active)
        .map(|(id, _)| format!("-{}", id).red().to_string());
    let added = delta
        .added
        .iter()
        .filter(|(_, marker)| *marker == Marker::Active)
        .map(|(id, _)| format!("+{}", id).green().to_string());
    format!("  {}", removed.chain(added).collect::<Vec<_>>().join(" "))
}
