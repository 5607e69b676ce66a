//! Duplex transport abstraction.
//!
//! A [`Transceiver`] sends envelopes and fans inbound envelopes and the close
//! event out to registered listeners. Concrete transceivers share the
//! [`Listeners`] registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::envelope::Envelope;
use crate::errors::TransportError;

/// Callback for inbound envelopes.
pub type MessageListener = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback for the close event.
pub type CloseListener = Arc<dyn Fn() + Send + Sync>;

/// Listener registration options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenOptions {
    /// Remove the listener after its first invocation.
    pub once: bool,
}

impl ListenOptions {
    /// Options for a one-shot listener.
    pub fn once() -> Self {
        Self { once: true }
    }
}

/// A duplex, message-oriented transport carrying [`Envelope`]s.
#[async_trait]
pub trait Transceiver: Send + Sync {
    /// Send one envelope. Resolves once the transport has accepted it.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Register a listener for inbound envelopes.
    fn on_message(&self, listener: MessageListener, options: ListenOptions) -> Subscription;

    /// Register a listener for the close event. Fires at most once per listener.
    fn on_close(&self, listener: CloseListener, options: ListenOptions) -> Subscription;

    /// Close the transport. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the transport has closed.
    fn is_closed(&self) -> bool;
}

/// Handle to a registered listener.
///
/// Dropping the handle leaves the listener registered; call
/// [`cancel`](Self::cancel) to remove it.
#[must_use = "dropping a Subscription keeps the listener registered"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription whose listener is already gone.
    pub(crate) fn inert() -> Self {
        Self { cancel: None }
    }

    /// Remove the listener. Safe to call after a `once` listener has fired.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct Entry<T: ?Sized> {
    key: u64,
    once: bool,
    listener: Arc<T>,
}

struct Registry<T: ?Sized> {
    next_key: u64,
    entries: Vec<Entry<T>>,
}

/// Ordered listener registry.
///
/// Listeners are invoked outside the registry lock, so a listener may
/// register or cancel other listeners while it runs.
pub struct Listeners<T: ?Sized> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> Listeners<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_key: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register `listener`.
    pub fn add(&self, listener: Arc<T>, options: ListenOptions) -> Subscription {
        let key = {
            let mut registry = self.registry.lock();
            registry.next_key += 1;
            let key = registry.next_key;
            registry.entries.push(Entry {
                key,
                once: options.once,
                listener,
            });
            key
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = weak.upgrade() {
                registry.lock().entries.retain(|entry| entry.key != key);
            }
        })
    }

    /// Snapshot the listeners to invoke for one event, removing `once` entries.
    pub fn take_for_emit(&self) -> Vec<Arc<T>> {
        let mut registry = self.registry.lock();
        let listeners = registry
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.listener))
            .collect();
        registry.entries.retain(|entry| !entry.once);
        listeners
    }

    /// Remove and return every listener.
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut registry = self.registry.lock();
        registry
            .entries
            .drain(..)
            .map(|entry| entry.listener)
            .collect()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.registry.lock().entries.clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Message and close listeners plus the closed flag, as every transceiver needs them.
pub(crate) struct ListenerSet {
    pub(crate) messages: Listeners<dyn Fn(&Envelope) + Send + Sync>,
    pub(crate) closes: Listeners<dyn Fn() + Send + Sync>,
    closed: AtomicBool,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self {
            messages: Listeners::new(),
            closes: Listeners::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a close listener; fires immediately when already closed.
    pub(crate) fn on_close(&self, listener: CloseListener, options: ListenOptions) -> Subscription {
        let fired = Arc::new(AtomicBool::new(false));
        let guarded: CloseListener = Arc::new(move || {
            if !fired.swap(true, Ordering::AcqRel) {
                listener();
            }
        });
        let subscription = self.closes.add(Arc::clone(&guarded), options);
        // mark_closed may be draining concurrently; only this entry is ours to remove
        if self.is_closed() {
            subscription.cancel();
            guarded();
            return Subscription::inert();
        }
        subscription
    }

    /// Invoke every message listener with `envelope`. Ignored once closed.
    pub(crate) fn emit(&self, envelope: &Envelope) {
        if self.is_closed() {
            return;
        }
        for listener in self.messages.take_for_emit() {
            listener(envelope);
        }
    }

    /// Mark closed and fire the close listeners. Returns `false` if already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.messages.clear();
        for listener in self.closes.drain() {
            listener();
        }
        true
    }
}
