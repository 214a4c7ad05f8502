//! System event bus.
//!
//! Thin wrapper over a `tokio::sync::broadcast` channel: emitting never
//! blocks or fails, each live subscriber sees an event at most once, and a
//! subscriber only sees events emitted after it subscribed.

use std::collections::HashSet;

use pagestream_protocol::{EventKind, SystemEvent};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SystemEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event. Returns how many subscribers will receive it.
    pub fn emit(&self, event: SystemEvent) -> usize {
        debug!(event = %event.kind(), "system event");
        // No subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to every event kind.
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription { rx: self.tx.subscribe(), kinds: None }
    }

    /// Subscribe to a subset of event kinds.
    pub fn subscribe_to(&self, kinds: impl IntoIterator<Item = EventKind>) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct EventSubscription {
    rx: broadcast::Receiver<SystemEvent>,
    kinds: Option<HashSet<EventKind>>,
}

impl EventSubscription {
    /// Wait for the next matching event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events lost");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events lost");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn accepts(&self, event: &SystemEvent) -> bool {
        self.kinds.as_ref().is_none_or(|k| k.contains(&event.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_subscription_skips_other_kinds() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_to([EventKind::ResponderMissing]);

        bus.emit(SystemEvent::ClientRegistered { view: "main".into() });
        bus.emit(SystemEvent::ResponderMissing {
            responder: "rpc".into(),
            connection_id: "c".into(),
            channel: "x".into(),
        });

        let event = sub.try_recv().unwrap();
        assert_eq!(event.kind(), EventKind::ResponderMissing);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn late_subscribers_see_no_replay() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(SystemEvent::ClientRegistered { view: "main".into() }), 0);

        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());

        bus.emit(SystemEvent::ClientRegistered { view: "admin".into() });
        assert_eq!(sub.try_recv(), Some(SystemEvent::ClientRegistered { view: "admin".into() }));
    }

    #[tokio::test]
    async fn every_subscriber_gets_each_event_once() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.emit(SystemEvent::ConnectionOpened { connection_id: "c1".into() }), 2);

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
        assert!(a.try_recv().is_none());
        assert!(b.try_recv().is_none());
    }
}
