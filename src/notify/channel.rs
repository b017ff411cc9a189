//! Channel-backed listener
//!
//! Forwards listener callbacks into a crossbeam channel so consumers run on
//! their own thread and never hold up the destroying thread.

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::destroy::Outcome;
use crate::Key;

use super::RegionListener;

/// Event delivered to a [`ChannelListener`]'s receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Destroyed { key: Key, outcome: Outcome },
    Cleared,
}

/// A [`RegionListener`] that queues events on an unbounded channel
pub struct ChannelListener {
    sender: Sender<ListenerEvent>,
}

impl ChannelListener {
    /// Create a listener and the receiver its events arrive on
    pub fn new() -> (Self, Receiver<ListenerEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ListenerEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event);
    }
}

impl RegionListener for ChannelListener {
    fn after_destroy(&self, key: &Key, outcome: Outcome) {
        self.send(ListenerEvent::Destroyed {
            key: key.clone(),
            outcome,
        });
    }

    fn after_clear(&self) {
        self.send(ListenerEvent::Cleared);
    }
}
