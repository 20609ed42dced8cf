//! Delayed transition timers.
//!
//! The interpreter never sleeps. Each step reports the timers it arms and
//! cancels as [`TimerCommand`]s; a [`TimerRegistry`] turns them into
//! deadlines that a driver polls.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Identifies an armed delayed transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerKey {
    /// Id of the node that armed the timer.
    pub node: String,
    /// Event delivered when the timer fires.
    pub event: String,
}

impl TimerKey {
    pub fn new(node: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            event: event.into(),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.event, self.node)
    }
}

/// Timer side effect of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TimerCommand {
    Arm { key: TimerKey, delay_ms: u64 },
    Cancel { key: TimerKey },
}

impl TimerCommand {
    pub fn key(&self) -> &TimerKey {
        match self {
            TimerCommand::Arm { key, .. } | TimerCommand::Cancel { key } => key,
        }
    }
}

/// Deadlines of armed timers.
#[derive(Debug, Clone, Default)]
pub struct TimerRegistry {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies step commands in order. Arming an armed key replaces it.
    pub fn apply(&mut self, commands: &[TimerCommand], now: Instant) {
        for command in commands {
            match command {
                TimerCommand::Arm { key, delay_ms } => {
                    self.arm(key.clone(), Duration::from_millis(*delay_ms), now);
                }
                TimerCommand::Cancel { key } => {
                    self.cancel(key);
                }
            }
        }
    }

    pub fn arm(&mut self, key: TimerKey, delay: Duration, now: Instant) {
        tracing::trace!("Timer {} armed for {}ms", key, delay.as_millis());
        self.deadlines.insert(key, now + delay);
    }

    /// Cancels a timer, returning whether it was armed.
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        self.deadlines.remove(key).is_some()
    }

    pub fn contains(&self, key: &TimerKey) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    /// Earliest deadline of all armed timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Timers due at `now`, earliest first.
    pub fn due(&self, now: Instant) -> Vec<TimerKey> {
        let mut due: Vec<(&TimerKey, &Instant)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .collect();
        due.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        due.into_iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(event: &str) -> TimerKey {
        TimerKey::new("light.green", event)
    }

    #[test]
    fn test_arm_and_due() {
        let now = Instant::now();
        let mut timers = TimerRegistry::new();
        timers.apply(
            &[
                TimerCommand::Arm { key: key("slow"), delay_ms: 500 },
                TimerCommand::Arm { key: key("fast"), delay_ms: 100 },
            ],
            now,
        );

        assert_eq!(timers.len(), 2);
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(100)));
        assert!(timers.due(now).is_empty());
        assert_eq!(timers.due(now + Duration::from_millis(100)), vec![key("fast")]);
        assert_eq!(
            timers.due(now + Duration::from_secs(1)),
            vec![key("fast"), key("slow")]
        );
    }

    #[test]
    fn test_cancel() {
        let now = Instant::now();
        let mut timers = TimerRegistry::new();
        timers.apply(&[TimerCommand::Arm { key: key("t"), delay_ms: 10 }], now);
        timers.apply(&[TimerCommand::Cancel { key: key("t") }], now);
        assert!(timers.is_empty());
        assert!(!timers.cancel(&key("t")));
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let now = Instant::now();
        let later = now + Duration::from_millis(50);
        let mut timers = TimerRegistry::new();
        timers.apply(&[TimerCommand::Arm { key: key("t"), delay_ms: 100 }], now);
        timers.apply(
            &[
                TimerCommand::Cancel { key: key("t") },
                TimerCommand::Arm { key: key("t"), delay_ms: 100 },
            ],
            later,
        );
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.deadline(&key("t")), Some(later + Duration::from_millis(100)));
    }
}
