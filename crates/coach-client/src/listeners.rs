use std::sync::{Arc, Mutex, MutexGuard, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered list of callbacks. Each `subscribe` hands back a [`Subscription`]
/// that removes exactly that callback.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
}

impl<T: 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut set = lock(&self.inner);
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<ListenerSet<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Call every callback in subscription order. Callbacks run outside the
    /// lock, so they may subscribe or unsubscribe freely.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.inner)
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn clear(&self) {
        lock(&self.inner).entries.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by `on_message` / `on_connection_change`.
///
/// Dropping it keeps the callback registered; call [`Subscription::unsubscribe`]
/// to remove it.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_in_insertion_order() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            let _sub = listeners.subscribe(move |v| seen.lock().unwrap().push((tag, *v)));
        }
        listeners.emit(&7);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn unsubscribe_removes_only_that_callback() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let seen = seen.clone();
            listeners.subscribe(move |v| seen.lock().unwrap().push(("a", *v)))
        };
        let _b = {
            let seen = seen.clone();
            listeners.subscribe(move |v| seen.lock().unwrap().push(("b", *v)))
        };

        a.unsubscribe();
        listeners.emit(&1);

        assert_eq!(*seen.lock().unwrap(), vec![("b", 1)]);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn unsubscribe_after_clear_is_harmless() {
        let listeners: Listeners<u32> = Listeners::new();
        let sub = listeners.subscribe(|_| {});
        listeners.clear();
        sub.unsubscribe();
        assert!(listeners.is_empty());
    }

    #[test]
    fn callback_may_subscribe_during_emit() {
        let listeners: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let inner = listeners.clone();
        let _sub = listeners.subscribe(move |_| {
            let _ = inner.subscribe(|_| {});
        });

        listeners.emit(&0);
        assert_eq!(listeners.len(), 2);
    }
}
