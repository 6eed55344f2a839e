//! Value holders that notify subscribers synchronously on change.
//!
//! `Observable<T>` is the state surface the tracker exposes to whatever view
//! layer sits on top of it. Derived values (button flags, summary lines) are
//! built with [`Observable::map`] and stay in sync with their source.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ObservableInner<T> {
    value: RwLock<T>,
    /// Held from the store until the last listener returns, so concurrent
    /// writers notify in the order they wrote.
    publish: Mutex<()>,
    listeners: Mutex<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: AtomicU64,
}

pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(ObservableInner {
                value: RwLock::new(initial),
                publish: Mutex::new(()),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Borrows the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Stores `value` and notifies every subscriber, even if the value did
    /// not change.
    pub fn set(&self, value: T) {
        let _publish = self.inner.publish.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut guard = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *guard = value.clone();
        }
        self.notify(&value);
    }

    /// Registers `listener`; it runs on the thread that calls `set`, after the
    /// new value is visible through `get`. A listener may read this observable
    /// but must not write to it.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Observable whose value is `f` applied to this one's, recomputed on
    /// every change of the source.
    pub fn map<U, F>(&self, f: F) -> Observable<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = Observable::new(f(&self.get()));
        let target = derived.clone();
        self.subscribe(move |value| target.set(f(value)));
        derived
    }

    fn notify(&self, value: &T) {
        // Snapshot so listeners can subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener<T>> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(value);
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Observable<T> {
    /// Like [`Observable::set`] but skips notification when the value is equal
    /// to the current one. Returns whether a change happened.
    pub fn set_if_changed(&self, value: T) -> bool {
        let _publish = self.inner.publish.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut guard = self
                .inner
                .value
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if *guard == value {
                return false;
            }
            *guard = value.clone();
        }
        self.notify(&value);
        true
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.value.try_read() {
            Ok(value) => f.debug_tuple("Observable").field(&*value).finish(),
            Err(_) => f.write_str("Observable(<locked>)"),
        }
    }
}
