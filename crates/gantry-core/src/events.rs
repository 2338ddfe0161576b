use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

/// Typed observer list.
///
/// Events are dispatched synchronously, in subscription order, on the
/// emitting thread. Handlers run outside the internal lock so they may
/// subscribe or unsubscribe while being called. A panicking handler is
/// logged and skipped; later handlers still see the event.
pub struct EventBus<E> {
    inner: Mutex<BusInner<E>>,
}

struct BusInner<E> {
    next_id: u64,
    handlers: Vec<(SubscriptionId, Handler<E>)>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                next_id: 0,
                handlers: Vec::new(),
            }),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Returns false if the id was not (or no longer) subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.handlers.len();
        inner.handlers.retain(|(sid, _)| *sid != id);
        inner.handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .inner
            .lock()
            .handlers
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!("Event subscriber panicked; continuing dispatch");
            }
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_run_in_subscription_order() {
        let bus = EventBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            bus.subscribe(move |n: &u32| seen.lock().push(format!("{}{}", tag, n)));
        }
        bus.emit(&1);
        bus.emit(&2);
        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::<u32>::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_| *c.lock() += 1);
        bus.emit(&0);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&0);
        assert_eq!(*count.lock(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_stop_dispatch() {
        let bus = EventBus::<u32>::new();
        let reached = Arc::new(Mutex::new(false));
        bus.subscribe(|_| panic!("boom"));
        let r = reached.clone();
        bus.subscribe(move |_| *r.lock() = true);
        bus.emit(&7);
        assert!(*reached.lock());
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::<u32>::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(Mutex::new(0));
        let id = {
            let bus = bus.clone();
            let slot = slot.clone();
            let count = count.clone();
            bus.clone().subscribe(move |_| {
                *count.lock() += 1;
                if let Some(id) = *slot.lock() {
                    bus.unsubscribe(id);
                }
            })
        };
        *slot.lock() = Some(id);
        bus.emit(&1);
        bus.emit(&2);
        assert_eq!(*count.lock(), 1);
    }
}
