//! Observer registries for telemetry updates, errors and state changes.
//!
//! Callbacks run synchronously on the stream worker, in registration order,
//! and must not block.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Set of callbacks notified with a shared value.
pub struct Observers<T> {
    registry: Arc<RwLock<Registry<T>>>,
}

impl<T: 'static> Observers<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Registers `callback` until the returned [`Subscription`] is dropped.
    pub fn register<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = match self.registry.write() {
            Ok(mut registry) => {
                let id = registry.next_id;
                registry.next_id += 1;
                registry.entries.push((id, Arc::new(callback)));
                id
            }
            Err(_) => return Subscription::inert(),
        };

        let registry: Weak<RwLock<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    if let Ok(mut registry) = registry.write() {
                        registry.entries.retain(|(entry, _)| *entry != id);
                    }
                }
            })),
        }
    }

    /// Invokes every registered callback with `value`.
    ///
    /// The callback list is snapshotted first, so a callback may register or
    /// drop subscriptions without deadlocking.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = match self.registry.read() {
            Ok(registry) => registry
                .entries
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.registry
            .read()
            .map(|registry| registry.entries.len())
            .unwrap_or(0)
    }

    /// True when nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Observers<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: 'static> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.len())
            .finish()
    }
}

/// Registration handle; the callback is removed when this is dropped.
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { cancel: None }
    }

    /// Removes the callback now.
    pub fn unregister(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the callback registered for the lifetime of the registry.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::Observers;

    #[test]
    fn callbacks_run_in_registration_order() {
        let observers = Observers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = Arc::clone(&seen);
            observers.register(move |value| seen.lock().expect("lock").push(("a", *value)))
        };
        let second = {
            let seen = Arc::clone(&seen);
            observers.register(move |value| seen.lock().expect("lock").push(("b", *value)))
        };

        observers.notify(&7);
        assert_eq!(*seen.lock().expect("lock"), vec![("a", 7), ("b", 7)]);
        drop((first, second));
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let observers = Observers::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let calls = Arc::clone(&calls);
            observers.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        observers.notify(&());
        drop(subscription);
        observers.notify(&());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(observers.is_empty());
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let observers = Observers::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            observers
                .register(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .detach();
        }
        observers.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let observers = Observers::<()>::new();
        let subscription = observers.register(|_| {});
        drop(observers);
        subscription.unregister();
    }
}
