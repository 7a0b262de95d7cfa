//! Thread-safe event dispatcher shared by every layer of the stack.
//!
//! Listeners may register from the I/O tasks or from the serialized scope,
//! so the registry itself is guarded by a lock. Dispatch works on a snapshot
//! taken at the start of [`Emitter::emit`]: listeners added during a
//! dispatch pass are not invoked in that pass, and one-shot listeners are
//! unregistered before any of the snapshot runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A registered callback. Cloning yields a handle to the same listener, and
/// removal compares handles by identity rather than by function equality.
pub struct Listener<T: ?Sized>(Arc<dyn Fn(&T) + Send + Sync>);

impl<T: ?Sized> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Listener(self.0.clone())
    }
}

impl<T: ?Sized> Listener<T> {
    pub fn new(f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        Listener(Arc::new(f))
    }

    pub fn call(&self, value: &T) {
        (self.0)(value)
    }

    /// Identity comparison, used by [`Emitter::off_listener`].
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> std::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

struct Entry<T: ?Sized> {
    listener: Listener<T>,
    once: bool,
}

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Entry {
            listener: self.listener.clone(),
            once: self.once,
        }
    }
}

/// String-keyed publish/subscribe registry with payload type `T`.
pub struct Emitter<T: ?Sized> {
    events: Mutex<HashMap<String, Vec<Entry<T>>>>,
}

impl<T: ?Sized> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Emitter<T> {
    pub fn new() -> Self {
        Emitter {
            events: Mutex::new(HashMap::new()),
        }
    }

    /// Register a persistent listener and return its handle.
    pub fn on(&self, event: &str, f: impl Fn(&T) + Send + Sync + 'static) -> Listener<T> {
        let listener = Listener::new(f);
        self.add(event, listener.clone(), false);
        listener
    }

    /// Register a listener that is removed right before its first dispatch.
    pub fn once(&self, event: &str, f: impl Fn(&T) + Send + Sync + 'static) -> Listener<T> {
        let listener = Listener::new(f);
        self.add(event, listener.clone(), true);
        listener
    }

    fn add(&self, event: &str, listener: Listener<T>, once: bool) {
        let mut events = self.events.lock().unwrap();
        events
            .entry(event.to_owned())
            .or_default()
            .push(Entry { listener, once });
    }

    /// Remove every listener for every event.
    pub fn off_all(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Remove every listener for `event`.
    pub fn off(&self, event: &str) {
        self.events.lock().unwrap().remove(event);
    }

    /// Remove a single listener, matched by identity.
    pub fn off_listener(&self, event: &str, listener: &Listener<T>) {
        let mut events = self.events.lock().unwrap();
        if let Some(entries) = events.get_mut(event) {
            entries.retain(|e| !e.listener.ptr_eq(listener));
            if entries.is_empty() {
                events.remove(event);
            }
        }
    }

    /// Dispatch `value` to the listeners registered for `event` at the time
    /// of the call. One-shot listeners present in the snapshot are
    /// unregistered before the snapshot is invoked.
    pub fn emit(&self, event: &str, value: &T) {
        let snapshot: Vec<Entry<T>> = {
            let mut events = self.events.lock().unwrap();
            match events.get_mut(event) {
                Some(entries) => {
                    let snapshot = entries.clone();
                    entries.retain(|e| !e.once);
                    if entries.is_empty() {
                        events.remove(event);
                    }
                    snapshot
                }
                None => return,
            }
        };
        for entry in &snapshot {
            entry.listener.call(value);
        }
    }

    /// Handles of the listeners currently registered for `event`.
    pub fn listeners(&self, event: &str) -> Vec<Listener<T>> {
        self.events
            .lock()
            .unwrap()
            .get(event)
            .map(|entries| entries.iter().map(|e| e.listener.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .get(event)
            .is_some_and(|e| !e.is_empty())
    }
}

impl<T: ?Sized> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events = self.events.lock().unwrap();
        f.debug_struct("Emitter").field("events", &events.len()).finish()
    }
}

/// An installed subscription that can be destroyed later.
///
/// The engine registers a handful of listeners on its current transport and
/// tears them down as a unit when the transport is replaced; probes do the
/// same when they freeze.
pub struct Sub<T: ?Sized> {
    emitter: Arc<Emitter<T>>,
    event: String,
    listener: Listener<T>,
}

impl<T: ?Sized> Sub<T> {
    pub fn new(emitter: Arc<Emitter<T>>, event: &str, listener: Listener<T>) -> Self {
        Sub {
            emitter,
            event: event.to_owned(),
            listener,
        }
    }

    /// Unregister the listener.
    pub fn destroy(&self) {
        self.emitter.off_listener(&self.event, &self.listener);
    }
}

impl<T: ?Sized> Drop for Sub<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn on_and_emit() {
        let emitter: Emitter<u32> = Emitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        emitter.on("tick", move |v| {
            h.fetch_add(*v as usize, Ordering::SeqCst);
        });
        emitter.emit("tick", &2);
        emitter.emit("tick", &3);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn once_fires_exactly_once() {
        let emitter: Emitter<()> = Emitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        emitter.once("tick", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit("tick", &());
        emitter.emit("tick", &());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!emitter.has_listeners("tick"));
    }

    #[test]
    fn off_listener_is_identity_based() {
        let emitter: Emitter<()> = Emitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = hits.clone();
        let h2 = hits.clone();
        let a = emitter.on("tick", move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        emitter.on("tick", move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });
        emitter.off_listener("tick", &a);
        emitter.emit("tick", &());
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn listeners_added_during_emit_are_not_invoked() {
        let emitter: Arc<Emitter<()>> = Arc::new(Emitter::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let e = emitter.clone();
        let h = hits.clone();
        emitter.on("tick", move |_| {
            let h = h.clone();
            e.on("tick", move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        });
        emitter.emit("tick", &());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // the nested listener is part of the next snapshot
        emitter.emit("tick", &());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sub_destroy_unregisters() {
        let emitter: Arc<Emitter<()>> = Arc::new(Emitter::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let listener = emitter.on("tick", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let sub = Sub::new(emitter.clone(), "tick", listener);
        sub.destroy();
        emitter.emit("tick", &());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_event_and_off_all() {
        let emitter: Emitter<()> = Emitter::new();
        emitter.on("a", |_| {});
        emitter.on("b", |_| {});
        emitter.off("a");
        assert!(!emitter.has_listeners("a"));
        assert!(emitter.has_listeners("b"));
        emitter.off_all();
        assert!(!emitter.has_listeners("b"));
    }
}
