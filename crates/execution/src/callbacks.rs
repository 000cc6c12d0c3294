//! Subscriber registry for engine event fan-out
//!
//! Callbacks are keyed by a [`SubscriberId`] so they can be deregistered
//! explicitly. Dispatch catches panics: one bad subscriber must not
//! destabilize the engine or corrupt order state.

use std::panic::{catch_unwind, AssertUnwindSafe};

use log::error;

/// Handle returned at registration, used to deregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

pub(crate) struct CallbackRegistry<T> {
    next_id: u64,
    subscribers: Vec<(SubscriberId, Callback<T>)>,
}

impl<T> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            subscribers: Vec::new(),
        }
    }

    pub fn register(&mut self, callback: Callback<T>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, callback));
        id
    }

    /// Remove a subscriber; returns false if the id was unknown
    pub fn deregister(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub fn dispatch(&self, event: &T) {
        for (id, callback) in &self.subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("[EXEC] Subscriber {:?} panicked in callback, continuing", id);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_register_dispatch_deregister() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let count = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&count);
        let id = registry.register(Box::new(move |v| {
            c.fetch_add(*v, Ordering::SeqCst);
        }));

        registry.dispatch(&2);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        assert!(registry.deregister(id));
        assert!(!registry.deregister(id));
        registry.dispatch(&2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        let mut registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let count = Arc::new(AtomicU32::new(0));

        registry.register(Box::new(|_| panic!("bad subscriber")));
        let c = Arc::clone(&count);
        registry.register(Box::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        // The panic is caught and the second subscriber still runs
        registry.dispatch(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
