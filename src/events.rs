//! Idle-event bus
//!
//! One-to-many notification fan-out from the engine to any number of
//! listeners (a network protocol layer, a UI, tests). Emission never blocks:
//! subscribers get unbounded channels and disconnected subscribers are pruned
//! on the next emit.

use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Abstract notification kinds emitted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    /// Playback state or current song changed
    Player,

    /// Cross-fade / MixRamp / replay-gain settings changed
    Options,
}

/// Fan-out event bus.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<IdleEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> Receiver<IdleEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    pub fn emit(&self, event: IdleEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_emit() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(IdleEvent::Player);
        assert_eq!(rx1.try_recv(), Ok(IdleEvent::Player));
        assert_eq!(rx2.try_recv(), Ok(IdleEvent::Player));
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.emit(IdleEvent::Options);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.emit(IdleEvent::Player);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
