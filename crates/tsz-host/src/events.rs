//! Multi-subscriber event emitters.
//!
//! Listeners run synchronously on the emitting thread, in subscription order,
//! and only see values emitted while they are subscribed. Dropping the
//! returned [`Subscription`] removes the listener.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

pub struct Emitter<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut listeners = lock(&self.listeners);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.listeners);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    lock(&listeners).entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Deliver `value` to every current listener.
    pub fn emit(&self, value: &T) {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let snapshot: Vec<Listener<T>> = lock(&self.listeners)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a listener registered until dropped.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "../tests/events_tests.rs"]
mod events_tests;
