//! Event dispatch to registered listeners
//!
//! Delivery is at-least-once: a listener that reports failure is called
//! again with the same event, and events are not replayed to listeners that
//! register later. Handlers must therefore be idempotent;
//! [`EventDeduplicator`] helps with that.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use timelock_util::ListenerId;
use tracing::{debug, warn};

use crate::CoreEvent;

/// Attempts per listener per event
const DELIVERY_ATTEMPTS: u32 = 3;

/// Returned by a listener that could not handle an event
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

type Listener = Arc<dyn Fn(&CoreEvent) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Fan-out of engine events. Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener. Must be paired with [`EventDispatcher::deregister`].
    pub fn register<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CoreEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = ListenerId::new(registry.next_id);
        registry.listeners.push((id, Arc::new(listener)));
        debug!(listener = %id, "Listener registered");
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn deregister(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let before = registry.listeners.len();
        registry.listeners.retain(|(lid, _)| *lid != id);
        let removed = registry.listeners.len() != before;
        if removed {
            debug!(listener = %id, "Listener deregistered");
        }
        removed
    }

    /// Register a listener that is removed when the returned guard drops
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&CoreEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.register(listener);
        Subscription {
            dispatcher: self.clone(),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry().listeners.len()
    }

    /// Deliver `event` to every listener registered right now
    pub fn dispatch(&self, event: &CoreEvent) {
        // Listeners run without the lock so they may (de)register
        let listeners: Vec<(ListenerId, Listener)> = self.registry().listeners.clone();

        for (id, listener) in listeners {
            let mut attempt = 1;
            loop {
                match listener(event) {
                    Ok(()) => break,
                    Err(e) if attempt >= DELIVERY_ATTEMPTS => {
                        warn!(listener = %id, error = %e, event = ?event, "Listener gave up on event");
                        break;
                    }
                    Err(e) => {
                        debug!(listener = %id, attempt, error = %e, "Redelivering event");
                        attempt += 1;
                    }
                }
            }
        }
    }

    pub fn dispatch_all(&self, events: &[CoreEvent]) {
        for event in events {
            self.dispatch(event);
        }
    }
}

/// Registration guard; deregisters on drop
pub struct Subscription {
    dispatcher: EventDispatcher,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispatcher.deregister(self.id);
    }
}

/// Remembers recently seen occurrences so repeated deliveries are handled once
pub struct EventDeduplicator {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl EventDeduplicator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// False if an event with the same identity was already seen.
    /// Events without an identity are always new.
    pub fn first_delivery(&mut self, event: &CoreEvent) -> bool {
        let Some(key) = event.dedup_key() else {
            return true;
        };
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use timelock_api::AppState;
    use timelock_util::PackageId;

    fn expired(id: &str) -> CoreEvent {
        CoreEvent::TimeExpired {
            package_id: PackageId::new(id),
            from_state: AppState::Active,
            to_state: AppState::Locked,
            at: timelock_util::now(),
        }
    }

    #[test]
    fn register_dispatch_deregister() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicU32::new(0));

        let c = count.clone();
        let id = dispatcher.register(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch(&CoreEvent::Recovered);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(dispatcher.deregister(id));
        assert!(!dispatcher.deregister(id));
        dispatcher.dispatch(&CoreEvent::Recovered);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_listener_is_retried_and_others_still_served() {
        let dispatcher = EventDispatcher::new();
        let flaky_calls = Arc::new(AtomicU32::new(0));
        let steady_calls = Arc::new(AtomicU32::new(0));

        let f = flaky_calls.clone();
        dispatcher.register(move |_| {
            if f.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ListenerError("busy".into()))
            } else {
                Ok(())
            }
        });
        dispatcher.register(|_| Err(ListenerError("always broken".into())));
        let s = steady_calls.clone();
        dispatcher.register(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch(&expired("com.x"));

        assert_eq!(flaky_calls.load(Ordering::SeqCst), 2);
        assert_eq!(steady_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_listeners_get_no_replay() {
        let dispatcher = EventDispatcher::new();
        dispatcher.dispatch(&expired("com.x"));

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let _sub = dispatcher.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscription_guard_deregisters_on_drop() {
        let dispatcher = EventDispatcher::new();
        {
            let _sub = dispatcher.subscribe(|_| Ok(()));
            assert_eq!(dispatcher.listener_count(), 1);
        }
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn listener_may_deregister_itself() {
        let dispatcher = EventDispatcher::new();
        let handle = dispatcher.clone();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let s = slot.clone();
        let id = dispatcher.register(move |_| {
            if let Some(id) = *s.lock().unwrap() {
                handle.deregister(id);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(id);

        dispatcher.dispatch(&CoreEvent::Recovered);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn deduplicator_drops_repeats() {
        let mut dedup = EventDeduplicator::new(2);
        let event = expired("com.x");

        assert!(dedup.first_delivery(&event));
        assert!(!dedup.first_delivery(&event));
        assert!(dedup.first_delivery(&CoreEvent::Recovered));
        assert!(dedup.first_delivery(&CoreEvent::Recovered));
    }

    #[test]
    fn deduplicator_forgets_oldest() {
        let mut dedup = EventDeduplicator::new(1);
        let first = CoreEvent::DocumentChanged { revision: 1 };

        assert!(dedup.first_delivery(&first));
        assert!(dedup.first_delivery(&CoreEvent::DocumentChanged { revision: 2 }));
        assert!(dedup.first_delivery(&first));
    }
}
