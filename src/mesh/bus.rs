use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use hashbrown::HashMap;
use tokio::sync::mpsc;
use tracing::trace;

use super::{error::Error, wire::Payload};

/// Fire-and-forget broadcast among sessions on one logical channel.
///
/// Delivery is at most once, unacknowledged and unordered across
/// publishers; receipt order is only meaningful per connection. The local
/// publisher never receives its own message, since it already knows its
/// own state.
pub trait Transport {
    /// Sends `payload` to every other live subscriber on the channel and
    /// returns immediately.
    fn publish(&self, payload: &Payload) -> Result<(), Error>;

    /// Hands out the receiving half of the connection. Yields `Some` the
    /// first time only; messages arrive as raw wire strings so receivers
    /// exercise the real decode path.
    fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<String>>;

    /// Stops receiving and releases the channel handle. Idempotent, and
    /// called on drop so teardown paths cannot leak a subscription.
    fn close(&self);
}

type Subscribers = HashMap<u64, mpsc::UnboundedSender<String>>;

/// In-process fan-out hub standing in for a real broadcast primitive.
/// Handles joined on the same topic string see each other's messages;
/// topics are fully isolated from one another.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Mutex<HashMap<String, Subscribers>>>,
    next_handle: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new handle subscribed to `topic`.
    pub fn join(&self, topic: &str) -> BusHandle {
        let handle_id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .expect("bus state lock poisoned")
            .entry(topic.to_owned())
            .or_default()
            .insert(handle_id, tx);
        trace!(topic, handle_id, "handle joined bus");
        BusHandle {
            handle_id,
            topic: topic.to_owned(),
            bus: self.clone(),
            incoming: Some(rx),
            closed: AtomicBool::new(false),
        }
    }
}

/// One session's connection to a [`MemoryBus`] topic.
pub struct BusHandle {
    handle_id: u64,
    topic: String,
    bus: MemoryBus,
    incoming: Option<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
}

impl Transport for BusHandle {
    fn publish(&self, payload: &Payload) -> Result<(), Error> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::TransportClosed);
        }
        let raw = payload.encode()?;
        let mut topics =
            self.bus.topics.lock().expect("bus state lock poisoned");
        if let Some(subscribers) = topics.get_mut(&self.topic) {
            // a subscriber whose receiver is gone is pruned, not an error
            subscribers.retain(|&subscriber, tx| {
                subscriber == self.handle_id || tx.send(raw.clone()).is_ok()
            });
        }
        Ok(())
    }

    fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.incoming.take()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        let mut topics =
            self.bus.topics.lock().expect("bus state lock poisoned");
        if let Some(subscribers) = topics.get_mut(&self.topic) {
            subscribers.remove(&self.handle_id);
            if subscribers.is_empty() {
                topics.remove(&self.topic);
            }
        }
        trace!(topic = %self.topic, handle_id = self.handle_id, "handle left bus");
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::wire::PeerId;

    fn depart() -> Payload {
        Payload::Depart {
            id: PeerId::generate(),
        }
    }

    #[test]
    fn publish_reaches_every_other_handle_but_not_the_sender() {
        let bus = MemoryBus::new();
        let mut sender = bus.join("t");
        let mut a = bus.join("t");
        let mut b = bus.join("t");
        let mut sender_rx = sender.take_incoming().unwrap();
        let mut a_rx = a.take_incoming().unwrap();
        let mut b_rx = b.take_incoming().unwrap();

        sender.publish(&depart()).unwrap();
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
        assert!(sender_rx.try_recv().is_err());
    }

    #[test]
    fn topics_are_isolated() {
        let bus = MemoryBus::new();
        let speaker = bus.join("left");
        let mut other_topic = bus.join("right");
        let mut rx = other_topic.take_incoming().unwrap();
        speaker.publish(&depart()).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn incoming_is_handed_out_once() {
        let bus = MemoryBus::new();
        let mut handle = bus.join("t");
        assert!(handle.take_incoming().is_some());
        assert!(handle.take_incoming().is_none());
    }

    #[test]
    fn close_is_idempotent_and_stops_delivery() {
        let bus = MemoryBus::new();
        let speaker = bus.join("t");
        let mut listener = bus.join("t");
        let mut rx = listener.take_incoming().unwrap();

        listener.close();
        listener.close();
        speaker.publish(&depart()).unwrap();
        // sender side was deregistered, so nothing was queued before the
        // channel disconnected
        assert!(rx.try_recv().is_err());
        assert!(matches!(
            listener.publish(&depart()),
            Err(Error::TransportClosed)
        ));
    }

    #[test]
    fn dropping_a_handle_deregisters_it() {
        let bus = MemoryBus::new();
        let speaker = bus.join("t");
        drop(bus.join("t"));
        // publish would error only on a closed sender handle; a vanished
        // subscriber is silently pruned
        speaker.publish(&depart()).unwrap();
        let topics = speaker.bus.topics.lock().unwrap();
        assert_eq!(topics.get("t").map(|s| s.len()), Some(1));
    }
}
