//! Snapshot store with explicit subscribe/notify.
//!
//! Holders mutate through [`Observable::update`]; every subscriber is called
//! with the new snapshot after the lock is released, so callbacks may read the
//! store again without deadlocking.

use std::sync::Arc;

use parking_lot::Mutex;

pub type SubscriptionId = u64;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    value: T,
    listeners: Vec<(SubscriptionId, Listener<T>)>,
    next_id: SubscriptionId,
}

pub struct Observable<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> Observable<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                value,
                listeners: Vec::new(),
                next_id: 1,
            }),
        }
    }

    pub fn snapshot(&self) -> T {
        self.inner.lock().value.clone()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(sid, _)| *sid != id);
        inner.listeners.len() != before
    }

    /// Mutate the value and notify subscribers with the result.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let (result, value, listeners) = {
            let mut inner = self.inner.lock();
            let result = f(&mut inner.value);
            let listeners: Vec<Listener<T>> =
                inner.listeners.iter().map(|(_, l)| l.clone()).collect();
            (result, inner.value.clone(), listeners)
        };
        for listener in listeners {
            listener(&value);
        }
        result
    }

    pub fn set(&self, value: T) {
        self.update(|v| *v = value);
    }

    /// Replace the value only when `is_newer(current, &value)` holds. A value
    /// rejected here is never stored and no subscriber sees it.
    pub fn set_if(&self, value: T, is_newer: impl FnOnce(&T, &T) -> bool) -> bool {
        let (value, listeners) = {
            let mut inner = self.inner.lock();
            if !is_newer(&inner.value, &value) {
                return false;
            }
            inner.value = value;
            let listeners: Vec<Listener<T>> =
                inner.listeners.iter().map(|(_, l)| l.clone()).collect();
            (inner.value.clone(), listeners)
        };
        for listener in listeners {
            listener(&value);
        }
        true
    }
}

impl<T: Clone + Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_and_notify() {
        let store = Observable::new(0u32);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let id = store.subscribe(move |v| {
            seen_clone.store(*v as usize, Ordering::SeqCst);
        });

        store.set(5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(store.snapshot(), 5);

        assert!(store.unsubscribe(id));
        store.set(9);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert!(!store.unsubscribe(id));
    }

    #[test]
    fn test_callback_can_read_store() {
        let store = Arc::new(Observable::new(vec![1, 2]));
        let reader = store.clone();
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();
        store.subscribe(move |_| {
            observed_clone.store(reader.snapshot().len(), Ordering::SeqCst);
        });

        store.update(|v| v.push(3));
        assert_eq!(observed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_set_if_rejects_older_value() {
        let store = Observable::new(2u32);
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        store.subscribe(move |_| {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!store.set_if(1, |current, next| next > current));
        assert_eq!(store.snapshot(), 2);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        assert!(store.set_if(3, |current, next| next > current));
        assert_eq!(store.snapshot(), 3);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }
}
