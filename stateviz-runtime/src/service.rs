//! Interpreter service.
//!
//! One task owns the [`Interpreter`]. Callers talk to it through a
//! [`ServiceHandle`] that queues commands on a bounded channel; replies come
//! back on oneshot channels. The task also sleeps until the earliest armed
//! delayed transition and fires it, so events and timers are applied one at
//! a time in arrival order.

use crate::broadcast::{Snapshot, SnapshotBroadcaster, SnapshotCause, SnapshotFilter, SnapshotReceiver};
use crate::config::Config;
use crate::error::RuntimeError;
use serde_json::Value;
use stateviz_core::{CoreError, Event, Interpreter, InterpreterState, Machine, MachineDefinition};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Reply<T> = oneshot::Sender<Result<T, CoreError>>;

enum Command {
    Send {
        event: Event,
        reply: Reply<Arc<Snapshot>>,
    },
    Preview {
        event: Event,
        reply: Reply<Preview>,
    },
    Snapshot {
        reply: oneshot::Sender<Arc<Snapshot>>,
    },
    UpdateContext {
        patch: Value,
        reply: Reply<Arc<Snapshot>>,
    },
    Load {
        definition: MachineDefinition,
        reply: Reply<Arc<Snapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Uncommitted result of an event.
#[derive(Debug, Clone)]
pub struct Preview {
    pub state: InterpreterState,
    pub active_ids: Vec<String>,
}

/// Starts the interpreter task for `machine`.
///
/// Must be called from within a Tokio runtime.
pub fn spawn(machine: Machine, config: &Config) -> Result<(ServiceHandle, JoinHandle<()>), RuntimeError> {
    let machine = machine.with_transient_limit(config.interpreter.transient_limit);
    let interpreter = Interpreter::new(machine)?;
    let broadcaster = Arc::new(SnapshotBroadcaster::new(config.runtime.broadcast_capacity));

    let current = Arc::new(build_snapshot(&interpreter, 1, SnapshotCause::Start));
    broadcaster.publish(current.clone());

    let (commands, receiver) = mpsc::channel(config.runtime.queue_capacity);
    let service = Service {
        interpreter,
        broadcaster: broadcaster.clone(),
        current,
    };
    let task = tokio::spawn(service.run(receiver));

    Ok((
        ServiceHandle {
            commands,
            broadcaster,
        },
        task,
    ))
}

/// Cloneable client of a running interpreter service.
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Command>,
    broadcaster: Arc<SnapshotBroadcaster>,
}

impl ServiceHandle {
    /// Sends an event and waits for the committed snapshot.
    pub async fn send(&self, event: impl Into<Event>) -> Result<Arc<Snapshot>, RuntimeError> {
        let event = event.into();
        Ok(self.request(|reply| Command::Send { event, reply }).await??)
    }

    /// Computes the result of an event without committing it.
    pub async fn preview(&self, event: impl Into<Event>) -> Result<Preview, RuntimeError> {
        let event = event.into();
        Ok(self.request(|reply| Command::Preview { event, reply }).await??)
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> Result<Arc<Snapshot>, RuntimeError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Shallow-merges a JSON object into the context.
    pub async fn update_context(&self, patch: Value) -> Result<Arc<Snapshot>, RuntimeError> {
        Ok(self.request(|reply| Command::UpdateContext { patch, reply }).await??)
    }

    /// Replaces the running machine. Registered guards and the transient
    /// limit carry over; state, history and timers restart.
    pub async fn load(&self, definition: MachineDefinition) -> Result<Arc<Snapshot>, RuntimeError> {
        Ok(self.request(|reply| Command::Load { definition, reply }).await??)
    }

    /// Parses a JSON machine definition and loads it.
    pub async fn load_json(&self, json: &str) -> Result<Arc<Snapshot>, RuntimeError> {
        let definition = MachineDefinition::from_str(json)?;
        self.load(definition).await
    }

    /// Subscribes to snapshots committed from now on.
    pub fn subscribe(&self, filter: SnapshotFilter) -> SnapshotReceiver {
        self.broadcaster.subscribe(filter)
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.broadcaster.unsubscribe(subscription_id)
    }

    pub fn broadcaster(&self) -> &Arc<SnapshotBroadcaster> {
        &self.broadcaster
    }

    /// Stops the service task. Queued commands ahead of the shutdown are
    /// still applied.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| RuntimeError::ServiceClosed)?;
        rx.await.map_err(|_| RuntimeError::ServiceClosed)
    }
}

struct Service {
    interpreter: Interpreter,
    broadcaster: Arc<SnapshotBroadcaster>,
    current: Arc<Snapshot>,
}

impl Service {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("Interpreter service started for machine '{}'", self.interpreter.machine().id());

        loop {
            let deadline = self.interpreter.next_deadline();

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown { reply }) => {
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
                _ = sleep_until(deadline) => {
                    self.fire_due_timers();
                }
            }
        }

        tracing::info!("Interpreter service stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Send { event, reply } => {
                let result = self.interpreter.send(event).map(|_| ());
                let _ = reply.send(self.commit_ok(result, SnapshotCause::Event));
            }
            Command::Preview { event, reply } => {
                let result = self.interpreter.preview(event).map(|state| {
                    let active_ids = self.interpreter.machine().active_ids(&state);
                    Preview {
                        state,
                        active_ids: active_ids.into_iter().collect(),
                    }
                });
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.current.clone());
            }
            Command::UpdateContext { patch, reply } => {
                let result = self.interpreter.update_context(&patch).map(|_| ());
                let _ = reply.send(self.commit_ok(result, SnapshotCause::Context));
            }
            Command::Load { definition, reply } => {
                let current = self.interpreter.machine();
                let machine = Machine::new(definition)
                    .with_guards(current.guards().clone())
                    .with_transient_limit(current.transient_limit());
                let result = self.interpreter.replace_machine(machine).map(|_| ());
                let _ = reply.send(self.commit_ok(result, SnapshotCause::Load));
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn fire_due_timers(&mut self) {
        for key in self.interpreter.due_timers(Instant::now()) {
            match self.interpreter.fire_timer(&key) {
                Ok(Some(_)) => {
                    self.commit(SnapshotCause::Timer);
                }
                // Cancelled by an earlier timer in this batch.
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Timer {} failed: {}", key, e);
                }
            }
        }
    }

    fn commit_ok(
        &mut self,
        result: Result<(), CoreError>,
        cause: SnapshotCause,
    ) -> Result<Arc<Snapshot>, CoreError> {
        result.map(|()| self.commit(cause))
    }

    fn commit(&mut self, cause: SnapshotCause) -> Arc<Snapshot> {
        let snapshot = Arc::new(build_snapshot(
            &self.interpreter,
            self.current.sequence + 1,
            cause,
        ));
        self.current = snapshot.clone();
        self.broadcaster.publish(snapshot.clone());
        snapshot
    }
}

fn build_snapshot(interpreter: &Interpreter, sequence: u64, cause: SnapshotCause) -> Snapshot {
    let machine = interpreter.machine();
    let next_events = interpreter.next_events().unwrap_or_else(|e| {
        tracing::warn!("Failed to compute next events: {}", e);
        Vec::new()
    });

    Snapshot {
        sequence,
        machine: machine.id().to_string(),
        checksum: machine.definition().checksum.clone(),
        cause,
        state: interpreter.state().clone(),
        active_ids: interpreter.active_ids().into_iter().collect(),
        next_events,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stateviz_core::StateValue;
    use std::time::Duration;
    use tokio::time::timeout;

    const LIGHT: &str = r#"{
        "id": "light",
        "initial": "green",
        "context": { "cars": 0 },
        "states": {
            "green": { "on": { "TIMER": "yellow" } },
            "yellow": { "after": { "200": "red" } },
            "red": { "on": { "TIMER": "green" } }
        }
    }"#;

    fn start() -> (ServiceHandle, JoinHandle<()>) {
        spawn(Machine::from_str(LIGHT).unwrap(), &Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let (handle, _task) = start();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.cause, SnapshotCause::Start);
        assert_eq!(snapshot.machine, "light");
        assert_eq!(snapshot.active_ids, vec!["light.green".to_string()]);
        assert_eq!(snapshot.next_events, vec!["TIMER".to_string()]);
        assert_eq!(handle.broadcaster().latest().unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_send() {
        let (handle, _task) = start();

        let snapshot = handle.send("TIMER").await.unwrap();
        assert_eq!(snapshot.sequence, 2);
        assert_eq!(snapshot.cause, SnapshotCause::Event);
        assert_eq!(snapshot.state.value, StateValue::from("yellow"));
        assert!(snapshot.next_events.is_empty());

        // Unhandled events still commit a snapshot.
        let snapshot = handle.send("NOPE").await.unwrap();
        assert_eq!(snapshot.sequence, 3);
        assert!(!snapshot.state.changed);
    }

    #[tokio::test]
    async fn test_preview_does_not_commit() {
        let (handle, _task) = start();

        let preview = handle.preview("TIMER").await.unwrap();
        assert_eq!(preview.active_ids, vec!["light.yellow".to_string()]);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.state.value, StateValue::from("green"));
    }

    #[tokio::test]
    async fn test_timer_fires() {
        let (handle, _task) = start();
        let mut rx = handle.subscribe(SnapshotFilter {
            causes: vec![SnapshotCause::Timer],
            ..Default::default()
        });

        handle.send("TIMER").await.unwrap();

        let fired = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.state.value, StateValue::from("red"));
        assert_eq!(fired.sequence, 3);
    }

    #[tokio::test]
    async fn test_leaving_state_cancels_timer() {
        let machine = Machine::from_str(
            r#"{
                "id": "m",
                "initial": "a",
                "states": {
                    "a": { "after": { "100": "b" }, "on": { "SKIP": "c" } },
                    "b": {},
                    "c": {}
                }
            }"#,
        )
        .unwrap();
        let (handle, _task) = spawn(machine, &Config::default()).unwrap();

        handle.send("SKIP").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state.value, StateValue::from("c"));
        assert_eq!(snapshot.sequence, 2);
    }

    #[tokio::test]
    async fn test_update_context() {
        let (handle, _task) = start();

        let snapshot = handle.update_context(json!({ "cars": 3 })).await.unwrap();
        assert_eq!(snapshot.cause, SnapshotCause::Context);
        assert_eq!(snapshot.state.context, json!({ "cars": 3 }));

        let err = handle.update_context(json!(3)).await.unwrap_err();
        assert!(err.as_core().is_some());
    }

    #[tokio::test]
    async fn test_load() {
        let (handle, _task) = start();
        handle.send("TIMER").await.unwrap();

        let snapshot = handle
            .load_json(r#"{ "id": "door", "initial": "closed", "states": { "closed": {} } }"#)
            .await
            .unwrap();
        assert_eq!(snapshot.cause, SnapshotCause::Load);
        assert_eq!(snapshot.machine, "door");
        assert_eq!(snapshot.active_ids, vec!["door.closed".to_string()]);

        let err = handle.load_json(r#"{ "id": "bad", "initial": "missing", "states": { "a": {} } }"#).await;
        assert!(err.is_err());
        assert_eq!(handle.snapshot().await.unwrap().machine, "door");
    }

    #[tokio::test]
    async fn test_transient_limit_from_config() {
        let mut config = Config::default();
        config.interpreter.transient_limit = 3;
        let machine = Machine::from_str(
            r#"{
                "id": "loop",
                "initial": "idle",
                "states": {
                    "idle": { "on": { "GO": "a" } },
                    "a": { "on": { "": "b" } },
                    "b": { "on": { "": "a" } }
                }
            }"#,
        )
        .unwrap();
        let (handle, _task) = spawn(machine, &config).unwrap();

        let err = handle.send("GO").await.unwrap_err();
        assert_eq!(err.error_code(), "TRANSIENT_CYCLE");
        assert_eq!(handle.snapshot().await.unwrap().active_ids, vec!["loop.idle".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (handle, task) = start();

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let err = handle.send("TIMER").await.unwrap_err();
        assert!(matches!(err, RuntimeError::ServiceClosed));
    }
}
