use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use indexmap::IndexMap;
use log::debug;
use serde::Serialize;

use crate::device::constants::STATUS_NOT_CONNECTED;
use crate::device::types::{ConnectionState, EnvironmentSnapshot};

/// What observers see of the acquisition subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedState {
    pub state: ConnectionState,
    pub status: String,
    pub connecting: bool,
    pub connected: bool,
    pub error: Option<String>,
    pub snapshot: Option<EnvironmentSnapshot>,
}

impl Default for PublishedState {
    fn default() -> Self {
        PublishedState {
            state: ConnectionState::Idle,
            status: STATUS_NOT_CONNECTED.to_string(),
            connecting: false,
            connected: false,
            error: None,
            snapshot: None,
        }
    }
}

pub type ObserverId = u64;

/// Receiving end handed to an observer. Dropping it is equivalent to unsubscribing.
#[derive(Debug)]
pub struct Subscription {
    pub id: ObserverId,
    pub receiver: UnboundedReceiver<PublishedState>,
}

/// Fan-out of [`PublishedState`] to any number of observers. Observers only ever get
/// copies; the owner of the publisher is the only writer.
#[derive(Debug, Default)]
pub struct StatePublisher {
    current: PublishedState,
    observers: IndexMap<ObserverId, UnboundedSender<PublishedState>>,
    next_id: ObserverId,
}

impl StatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &PublishedState {
        &self.current
    }

    /// The new observer immediately receives the current state.
    pub fn subscribe(&mut self) -> Subscription {
        let (sender, receiver) = unbounded();
        let id = self.next_id;
        self.next_id += 1;

        // the receiver is alive, this can not fail
        let _ = sender.unbounded_send(self.current.clone());
        self.observers.insert(id, sender);
        debug!("Observer {} subscribed", id);

        Subscription { id, receiver }
    }

    pub fn unsubscribe(&mut self, id: ObserverId) {
        if self.observers.shift_remove(&id).is_some() {
            debug!("Observer {} unsubscribed", id);
        }
    }

    #[cfg(test)]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn publish(&mut self, state: PublishedState) {
        self.current = state;

        let current = &self.current;
        self.observers.retain(|id, sender| {
            let delivered = sender.unbounded_send(current.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed observer {}", id);
            }
            delivered
        });
    }
}
