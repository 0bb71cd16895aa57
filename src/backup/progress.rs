//! Progress reporting for archive and extract operations
//!
//! Listeners subscribe explicitly and get their own unbounded channel.
//! Emitting never waits on a listener: a slow reader only grows its own
//! queue, and a dropped receiver is pruned on the next emit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Stage of an archive or extract pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Preparing,
    Archiving,
    Validating,
    Clearing,
    Extracting,
    Finalizing,
    Completed,
    Failed,
}

impl ProgressPhase {
    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressPhase::Completed | ProgressPhase::Failed)
    }
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    /// 0.0 to 100.0
    pub percent: f32,
    pub current_file: Option<String>,
}

impl ProgressEvent {
    pub fn new(phase: ProgressPhase, percent: f32, current_file: Option<String>) -> Self {
        Self {
            phase,
            percent: percent.clamp(0.0, 100.0),
            current_file,
        }
    }
}

/// Handle returned by [`ProgressHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of progress events to zero or more listeners
#[derive(Debug, Default)]
pub struct ProgressHub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Sender<ProgressEvent>)>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn subscribe(&self) -> (SubscriptionId, Receiver<ProgressEvent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel();
        self.lock_listeners().push((id, tx));
        (id, rx)
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Send an event to every listener without waiting on any of them
    pub fn emit(&self, event: ProgressEvent) {
        trace!(phase = ?event.phase, percent = event.percent, file = ?event.current_file, "progress");
        self.lock_listeners()
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Shorthand for [`emit`](Self::emit)
    pub fn report(&self, phase: ProgressPhase, percent: f32, current_file: Option<&str>) {
        self.emit(ProgressEvent::new(
            phase,
            percent,
            current_file.map(str::to_string),
        ));
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Sender<ProgressEvent>)>> {
        // A panicking listener thread can't poison this lock; recover anyway
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_listeners() {
        let hub = ProgressHub::new();
        hub.report(ProgressPhase::Archiving, 50.0, Some("database-000001.db"));
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn test_every_listener_receives_events() {
        let hub = ProgressHub::new();
        let (_a, rx_a) = hub.subscribe();
        let (_b, rx_b) = hub.subscribe();

        hub.report(ProgressPhase::Preparing, 0.0, None);
        hub.report(ProgressPhase::Completed, 100.0, None);

        for rx in [rx_a, rx_b] {
            let events: Vec<_> = rx.try_iter().collect();
            assert_eq!(events.len(), 2);
            assert!(events[1].phase.is_terminal());
        }
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = ProgressHub::new();
        let (id, rx) = hub.subscribe();

        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.report(ProgressPhase::Archiving, 10.0, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let hub = ProgressHub::new();
        let (_id, rx) = hub.subscribe();
        drop(rx);

        hub.report(ProgressPhase::Archiving, 10.0, None);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn test_slow_listener_does_not_block() {
        let hub = ProgressHub::new();
        let (_id, rx) = hub.subscribe();

        // Nobody reads while we emit
        for i in 0..10_000 {
            hub.report(ProgressPhase::Archiving, i as f32 / 100.0, None);
        }
        assert_eq!(rx.try_iter().count(), 10_000);
    }

    #[test]
    fn test_percent_is_clamped() {
        let event = ProgressEvent::new(ProgressPhase::Archiving, 140.0, None);
        assert_eq!(event.percent, 100.0);
    }
}
