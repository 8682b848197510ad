//! Listener registration and fan-out
//!
//! A small publish/subscribe primitive used by containers and object
//! adapters to notify application code of lifecycle and state changes.
//! Delivery is synchronous on the publishing task; the protocol driver
//! never publishes directly from its receive loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifies a registered listener so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of listeners that can be fired with a shared event value
pub struct EventSource<T> {
    handlers: Mutex<Vec<(SubscriberId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<T> EventSource<T> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener, returning an id usable with [`unsubscribe`](Self::unsubscribe)
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .expect("event source lock poisoned")
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered listener
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.handlers
            .lock()
            .expect("event source lock poisoned")
            .retain(|(h, _)| *h != id);
    }

    /// Remove every registered listener
    pub fn clear(&self) {
        self.handlers
            .lock()
            .expect("event source lock poisoned")
            .clear();
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.handlers
            .lock()
            .expect("event source lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener with the given event
    ///
    /// The handler list is snapshotted before delivery, so a handler may
    /// subscribe or unsubscribe on this source without deadlocking;
    /// membership changes take effect from the next `fire`.
    pub fn fire(&self, event: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .expect("event source lock poisoned")
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }
}
