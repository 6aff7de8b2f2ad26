//! Observer interfaces and the registries the client fans events out to.
//!
//! Two independent kinds of observer exist:
//! - [`ConnectionListener`]: told when the server is heard from and when the
//!   connection is torn down.
//! - [`MessageListener`]: told about every unsolicited server message.
//!
//! Every method has a no-op default, so an observer implements only the
//! events it cares about and is skipped for the rest.
//!
//! Registries hold `Arc`s and compare entries by identity (the address of the
//! shared value), so the same observer cannot be registered twice.

use std::sync::{Arc, Mutex, MutexGuard};

pub trait ConnectionListener: Send + Sync {
    /// A datagram arrived from the server.  Fired for every datagram, not
    /// only the first.
    fn on_connect(&self) {}

    /// The connection was torn down.
    fn on_disconnect(&self, _reason: &str) {}
}

pub trait MessageListener: Send + Sync {
    /// The server pushed a message (chat, join/leave notices, ...).
    fn on_message_received(&self, _message: &str) {}
}

/// Ordered, identity-keyed collection of observers.
pub struct ListenerRegistry<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

fn same<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
    // Compare data addresses only; vtable pointers of the same type may differ
    // across codegen units.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<L>>> {
        // A panicking listener must not take the registry down with it.
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Register `listener`.  Returns `false` if it is already registered.
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|l| same(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.lock().iter().any(|l| same(l, listener))
    }

    pub fn index_of(&self, listener: &Arc<L>) -> Option<usize> {
        self.lock().iter().position(|l| same(l, listener))
    }

    pub fn get(&self, index: usize) -> Option<Arc<L>> {
        self.lock().get(index).cloned()
    }

    /// Unregister `listener`.  Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.lock();
        match listeners.iter().position(|l| same(l, listener)) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Unregister the listener at `index`.  Returns `false` if out of range.
    pub fn remove_at(&self, index: usize) -> bool {
        let mut listeners = self.lock();
        if index >= listeners.len() {
            return false;
        }
        listeners.remove(index);
        true
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Copy of the current registrations, in registration order.
    ///
    /// Events are dispatched on the snapshot so a listener may (un)register
    /// observers from inside its callback.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.lock().clone()
    }
}

impl ListenerRegistry<dyn ConnectionListener> {
    pub fn notify_connect(&self) {
        for listener in self.snapshot() {
            listener.on_connect();
        }
    }

    pub fn notify_disconnect(&self, reason: &str) {
        for listener in self.snapshot() {
            listener.on_disconnect(reason);
        }
    }
}

impl ListenerRegistry<dyn MessageListener> {
    pub fn notify_message(&self, message: &str) {
        for listener in self.snapshot() {
            listener.on_message_received(message);
        }
    }
}
