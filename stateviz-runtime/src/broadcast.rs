//! Snapshot broadcasting for subscribers.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use stateviz_core::InterpreterState;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Why a snapshot was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCause {
    /// Interpreter started.
    Start,
    /// External event.
    Event,
    /// Delayed transition fired.
    Timer,
    /// Context was patched.
    Context,
    /// Machine was replaced.
    Load,
}

/// Committed interpreter state sent through broadcast channels.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Increases by one per published snapshot.
    pub sequence: u64,
    pub machine: String,
    pub checksum: String,
    pub cause: SnapshotCause,
    pub state: InterpreterState,
    pub active_ids: Vec<String>,
    pub next_events: Vec<String>,
}

/// Filter applied by a [`SnapshotReceiver`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    /// Only snapshots with these causes (empty = all).
    pub causes: Vec<SnapshotCause>,
    /// Only snapshots produced by these events (empty = all).
    pub events: Vec<String>,
    /// Skip snapshots whose event selected no transition.
    pub changed_only: bool,
}

impl SnapshotFilter {
    /// Returns true if the snapshot matches this filter.
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        (self.causes.is_empty() || self.causes.contains(&snapshot.cause))
            && (self.events.is_empty() || self.events.contains(&snapshot.state.event.name))
            && (!self.changed_only || snapshot.state.changed)
    }
}

/// Subscription info.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub filter: SnapshotFilter,
}

type Subscriptions = Arc<DashMap<String, Subscription>>;

/// Receiving end of a subscription.
///
/// Dropping the receiver removes its subscription.
pub struct SnapshotReceiver {
    subscription_id: String,
    filter: SnapshotFilter,
    receiver: broadcast::Receiver<Arc<Snapshot>>,
    subscriptions: Subscriptions,
}

impl SnapshotReceiver {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// Returns false once the subscription has been removed.
    pub fn is_active(&self) -> bool {
        self.subscriptions.contains_key(&self.subscription_id)
    }

    /// Waits for the next matching snapshot. Returns `None` once the
    /// broadcaster is gone or the subscription was removed. Snapshots dropped
    /// by a slow receiver are skipped.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            if !self.is_active() {
                return None;
            }
            match self.receiver.recv().await {
                Ok(snapshot) if !self.is_active() => {
                    tracing::debug!(
                        "Subscription {} closed, dropping snapshot {}",
                        self.subscription_id,
                        snapshot.sequence
                    );
                    return None;
                }
                Ok(snapshot) if self.filter.matches(&snapshot) => return Some(snapshot),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "Subscription {} lagged, {} snapshots skipped",
                        self.subscription_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching snapshot that is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            if !self.is_active() {
                return None;
            }
            match self.receiver.try_recv() {
                Ok(snapshot) if self.filter.matches(&snapshot) => return Some(snapshot),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for SnapshotReceiver {
    fn drop(&mut self) {
        if self.subscriptions.remove(&self.subscription_id).is_some() {
            tracing::debug!("Subscription {} dropped", self.subscription_id);
        }
    }
}

/// Publishes committed snapshots to subscribers.
pub struct SnapshotBroadcaster {
    sender: broadcast::Sender<Arc<Snapshot>>,

    /// Subscription metadata, shared with live receivers.
    subscriptions: Subscriptions,

    /// Most recent snapshot, for late subscribers.
    latest: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotBroadcaster {
    /// Creates a new SnapshotBroadcaster with the specified channel capacity.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            sender,
            subscriptions: Arc::new(DashMap::new()),
            latest: RwLock::new(None),
        }
    }

    /// Subscribes to snapshots published from now on.
    pub fn subscribe(&self, filter: SnapshotFilter) -> SnapshotReceiver {
        let subscription_id = format!("sub-{}", uuid::Uuid::new_v4());
        let receiver = self.sender.subscribe();

        self.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                subscription_id: subscription_id.clone(),
                filter: filter.clone(),
            },
        );

        SnapshotReceiver {
            subscription_id,
            filter,
            receiver,
            subscriptions: self.subscriptions.clone(),
        }
    }

    /// Unsubscribes. The receiver stops delivering snapshots.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id).is_some()
    }

    /// Publishes a snapshot to every subscriber.
    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.latest.write() = Some(snapshot.clone());
        // No receivers is fine.
        let _ = self.sender.send(snapshot);
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest.read().clone()
    }

    /// Gets subscription info.
    pub fn get_subscription(&self, subscription_id: &str) -> Option<Subscription> {
        self.subscriptions.get(subscription_id).map(|r| r.clone())
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for SnapshotBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stateviz_core::{Interpreter, Machine};

    fn snapshot(sequence: u64, event: &str, cause: SnapshotCause) -> Arc<Snapshot> {
        let machine = Machine::from_str(
            r#"{ "id": "m", "initial": "a", "states": { "a": { "on": { "GO": "b" } }, "b": {} } }"#,
        )
        .unwrap();
        let mut interpreter = Interpreter::new(machine).unwrap();
        let state = interpreter.send(event).unwrap().clone();
        Arc::new(Snapshot {
            sequence,
            machine: "m".to_string(),
            checksum: String::new(),
            cause,
            active_ids: interpreter.active_ids().into_iter().collect(),
            next_events: Vec::new(),
            state,
        })
    }

    #[test]
    fn test_subscribe() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let rx = broadcaster.subscribe(SnapshotFilter::default());

        assert!(rx.subscription_id().starts_with("sub-"));
        assert!(broadcaster.get_subscription(rx.subscription_id()).is_some());
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let rx = broadcaster.subscribe(SnapshotFilter::default());
        let sub_id = rx.subscription_id().to_string();

        assert!(broadcaster.unsubscribe(&sub_id));
        assert!(!broadcaster.unsubscribe(&sub_id)); // Already removed
        assert!(broadcaster.get_subscription(&sub_id).is_none());
    }

    #[tokio::test]
    async fn test_publish() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let mut rx = broadcaster.subscribe(SnapshotFilter::default());

        broadcaster.publish(snapshot(1, "GO", SnapshotCause::Event));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 1);
        assert_eq!(received.active_ids, vec!["m.b".to_string()]);
        assert_eq!(broadcaster.latest().unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let mut rx = broadcaster.subscribe(SnapshotFilter {
            changed_only: true,
            ..Default::default()
        });

        broadcaster.publish(snapshot(1, "NOPE", SnapshotCause::Event));
        broadcaster.publish(snapshot(2, "GO", SnapshotCause::Event));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 2);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_filter_matches() {
        let go = snapshot(1, "GO", SnapshotCause::Timer);

        assert!(SnapshotFilter::default().matches(&go));

        let filter = SnapshotFilter {
            causes: vec![SnapshotCause::Timer],
            ..Default::default()
        };
        assert!(filter.matches(&go));

        let filter = SnapshotFilter {
            causes: vec![SnapshotCause::Load],
            ..Default::default()
        };
        assert!(!filter.matches(&go));

        let filter = SnapshotFilter {
            events: vec!["GO".to_string()],
            changed_only: true,
            ..Default::default()
        };
        assert!(filter.matches(&go));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let mut rx = broadcaster.subscribe(SnapshotFilter::default());

        broadcaster.publish(snapshot(1, "GO", SnapshotCause::Event));
        assert!(broadcaster.unsubscribe(&rx.subscription_id().to_string()));
        broadcaster.publish(snapshot(2, "GO", SnapshotCause::Event));

        assert!(!rx.is_active());
        assert!(rx.try_recv().is_none());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_dropped_receiver_is_removed() {
        let broadcaster = SnapshotBroadcaster::new(16);
        let rx = broadcaster.subscribe(SnapshotFilter::default());
        let sub_id = rx.subscription_id().to_string();
        assert_eq!(broadcaster.subscription_count(), 1);

        drop(rx);
        assert_eq!(broadcaster.subscription_count(), 0);
        assert!(broadcaster.get_subscription(&sub_id).is_none());
    }

    #[test]
    fn test_subscription_count() {
        let broadcaster = SnapshotBroadcaster::new(16);
        assert_eq!(broadcaster.subscription_count(), 0);

        let rx1 = broadcaster.subscribe(SnapshotFilter::default());
        let _rx2 = broadcaster.subscribe(SnapshotFilter::default());
        assert_eq!(broadcaster.subscription_count(), 2);

        broadcaster.unsubscribe(rx1.subscription_id());
        assert_eq!(broadcaster.subscription_count(), 1);
    }
}
