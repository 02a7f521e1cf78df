//! Fan-out notifications over bounded channels
//!
//! Each subscriber gets its own receiver. Delivery never blocks the
//! publisher: a full channel drops the message for that subscriber and a
//! dropped receiver is pruned on the next publish.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

/// Per-subscriber buffer depth
const SUBSCRIBER_CAPACITY: usize = 256;

pub(crate) struct Subscribers<T> {
    senders: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.senders.lock().push(tx);
        rx
    }

    pub(crate) fn publish(&self, value: T) {
        self.senders
            .lock()
            .retain(|tx| match tx.try_send(value.clone()) {
                Ok(()) => true,
                // Slow consumer: drop this update, keep the subscription.
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().len()
    }
}
