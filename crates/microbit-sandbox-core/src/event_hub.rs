//! Publish/subscribe fan-out of board events.
//!
//! Subscribers run synchronously, in subscription order, on the emitting
//! task. The subscriber list is snapshotted before delivery, so a callback
//! may subscribe or unsubscribe without affecting the event in flight.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use microbit_sandbox_types::BoardEvent;
use tracing::trace;

pub type EventCallback = Rc<dyn Fn(&BoardEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    /// Only deliver events of this wire kind, when set.
    kind: Option<&'static str>,
    callback: EventCallback,
}

#[derive(Default)]
pub struct EventHub {
    next_id: Cell<u64>,
    subscribers: RefCell<Vec<Subscriber>>,
}

impl EventHub {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Receive every event.
    pub fn subscribe(&self, callback: impl Fn(&BoardEvent) + 'static) -> SubscriptionId {
        self.add(None, Rc::new(callback))
    }

    /// Receive only events whose [`BoardEvent::kind`] is `kind`.
    pub fn subscribe_to(
        &self,
        kind: &'static str,
        callback: impl Fn(&BoardEvent) + 'static,
    ) -> SubscriptionId {
        self.add(Some(kind), Rc::new(callback))
    }

    fn add(&self, kind: Option<&'static str>, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscribers.borrow_mut().push(Subscriber { id, kind, callback });
        id
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn emit(&self, event: BoardEvent) {
        let kind = event.kind();
        let targets: Vec<EventCallback> = self
            .subscribers
            .borrow()
            .iter()
            .filter(|s| s.kind.map_or(true, |k| k == kind))
            .map(|s| s.callback.clone())
            .collect();
        trace!(kind, subscribers = targets.len(), "emit");
        for callback in targets {
            callback(&event);
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microbit_sandbox_types::ButtonId;

    #[test]
    fn test_delivery_in_subscription_order() {
        let hub = EventHub::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            hub.subscribe(move |e| seen.borrow_mut().push(format!("{}:{}", tag, e.kind())));
        }
        hub.emit(BoardEvent::Reset {});
        assert_eq!(*seen.borrow(), vec!["first:reset", "second:reset"]);
    }

    #[test]
    fn test_kind_filter() {
        let hub = EventHub::new();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        hub.subscribe_to("reset", move |_| c.set(c.get() + 1));
        hub.emit(BoardEvent::ButtonPress { button: ButtonId::A });
        hub.emit(BoardEvent::Reset {});
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_unsubscribe_during_emit_keeps_snapshot() {
        let hub = EventHub::new();
        let count = Rc::new(Cell::new(0));
        let second_id = Rc::new(Cell::new(None));

        let h = hub.clone();
        let id_slot = second_id.clone();
        hub.subscribe(move |_| {
            if let Some(id) = id_slot.get() {
                h.unsubscribe(id);
            }
        });
        let c = count.clone();
        second_id.set(Some(hub.subscribe(move |_| c.set(c.get() + 1))));

        hub.emit(BoardEvent::Reset {});
        assert_eq!(count.get(), 1, "snapshot still delivers to the removed subscriber");
        hub.emit(BoardEvent::Reset {});
        assert_eq!(count.get(), 1);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_id() {
        let hub = EventHub::new();
        let id = hub.subscribe(|_| {});
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
    }
}
