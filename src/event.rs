//! Typed Event Bus
//!
//! Synchronous in-process publish/subscribe. Every Game and every Channel
//! owns its own bus instance; there is no process-wide event state.
//!
//! ## Dispatch contract
//!
//! - `publish` invokes every subscriber registered at the instant of the
//!   call, synchronously, in subscription order, on the calling thread.
//! - One-shot subscribers are claimed atomically with their single
//!   invocation: a re-entrant `publish` from inside a handler cannot fire
//!   them twice.
//! - Unsubscribing during dispatch does not affect the handler set already
//!   captured for the in-flight `publish` call.
//!
//! The bus carries no cross-process semantics; that is the Channel's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    token: u64,
}

struct Entry<E> {
    token: u64,
    once: bool,
    handler: Arc<dyn Fn(&E) + Send + Sync>,
}

/// A synchronous publish/subscribe bus for events of type `E`.
pub struct EventBus<E> {
    entries: Mutex<Vec<Entry<E>>>,
    next_token: AtomicU64,
}

impl<E> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Register a durable handler. It runs on every `publish` until
    /// unsubscribed.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(handler, false)
    }

    /// Register a one-shot handler. It runs on the next `publish` only and
    /// is removed atomically with that single invocation.
    pub fn subscribe_once<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(handler, true)
    }

    fn register<F>(&self, handler: F, once: bool) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().expect("event bus lock poisoned");
        entries.push(Entry {
            token,
            once,
            handler: Arc::new(handler),
        });
        Subscription { token }
    }

    /// Remove a subscription. A no-op if the handler already ran as a
    /// one-shot or was unsubscribed before.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut entries = self.entries.lock().expect("event bus lock poisoned");
        entries.retain(|e| e.token != subscription.token);
    }

    /// Publish an event to every current subscriber, in subscription order,
    /// on the calling thread.
    pub fn publish(&self, event: &E) {
        // Snapshot the handler list and claim one-shots under the lock, then
        // invoke with the lock released so handlers may publish or
        // (un)subscribe re-entrantly.
        let snapshot: Vec<Arc<dyn Fn(&E) + Send + Sync>> = {
            let mut entries = self.entries.lock().expect("event bus lock poisoned");
            let snapshot = entries.iter().map(|e| Arc::clone(&e.handler)).collect();
            entries.retain(|e| !e.once);
            snapshot
        };

        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.entries.lock().expect("event bus lock poisoned").len()
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
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::<u32>::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            bus.subscribe(move |n: &u32| log.lock().unwrap().push((i, *n)));
        }

        bus.publish(&7);
        assert_eq!(*log.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn one_shot_fires_exactly_once() {
        let bus = EventBus::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        bus.subscribe_once(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&());
        bus.publish(&());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn reentrant_publish_does_not_double_fire_one_shot() {
        let bus = Arc::new(EventBus::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        bus.subscribe_once(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // A durable handler that re-publishes from inside dispatch. The
        // one-shot was claimed before any handler ran, so the inner publish
        // must not reach it again.
        let inner = Arc::clone(&bus);
        bus.subscribe(move |n: &u32| {
            if *n == 0 {
                inner.publish(&1);
            }
        });

        bus.publish(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_during_dispatch_keeps_in_flight_set() {
        let bus = Arc::new(EventBus::<()>::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        // First handler unsubscribes the second mid-dispatch.
        let bus2 = Arc::clone(&bus);
        let slot2 = Arc::clone(&slot);
        bus.subscribe(move |_| {
            if let Some(sub) = slot2.lock().unwrap().take() {
                bus2.unsubscribe(sub);
            }
        });

        let f = Arc::clone(&fired);
        let sub = bus.subscribe(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        *slot.lock().unwrap() = Some(sub);

        // Second handler still runs this dispatch but not the next.
        bus.publish(&());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        bus.publish(&());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let bus = EventBus::<()>::new();
        let sub = bus.subscribe(|_| {});
        bus.unsubscribe(sub);
        bus.unsubscribe(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
