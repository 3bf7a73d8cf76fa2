use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace, warn};

use crate::error::SignalError;
use crate::listener::{self, Delivery, Listener, ListenerId};

/// The callback a listener's delivery loop invokes for every value it receives
pub type ListenerCallback<T> = Box<dyn FnMut(T) + Send + 'static>;

/// Trait for types that can be subscribed to a [`Signal`].
pub trait IntoListenerCallback<T> {
    fn into_listener_callback(self) -> ListenerCallback<T>;
}

/// A broadcast channel that hands every emitted value to each of its listeners.
///
/// Every listener runs its callback on its own delivery thread, fed through a queue that holds a single
/// in-flight value. [`emit`](Signal::emit) blocks until every listener's queue has accepted the value, so
/// a listener whose callback is slow delays the emitter and every listener after it.
///
/// **Callbacks must not block indefinitely**: doing so stalls every producer of the signal.
///
/// Cloning a `Signal` yields another handle to the same set of listeners. When the last handle is dropped
/// all remaining listeners are unsubscribed and their delivery threads exit.
///
/// A callback that captures a handle to its own signal (or to the [`Property`](crate::Property) owning it)
/// keeps that signal alive through its delivery thread, so dropping the other handles releases nothing.
/// Such listeners end with [`Listener::unsubscribe`], a [`ListenerGuard`](crate::ListenerGuard) or
/// [`close`](Signal::close).
pub struct Signal<T>(Arc<Inner<T>>);

pub(crate) struct Inner<T> {
    listeners: RwLock<ListenerSet<T>>,
    next_id: AtomicUsize,
}

struct ListenerSet<T> {
    entries: BTreeMap<ListenerId, Arc<listener::Inner<T>>>,
    closed: bool,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.0.listeners.read().expect("listeners lock is poisoned");
        f.debug_struct("Signal").field("listeners", &listeners.entries.len()).field("closed", &listeners.closed).finish()
    }
}

impl<T> Default for Signal<T>
where T: Clone + Send + 'static
{
    fn default() -> Self { Self::new() }
}

impl<T> Signal<T> {
    /// Number of currently subscribed listeners
    pub fn listener_count(&self) -> usize { self.0.listeners.read().expect("listeners lock is poisoned").entries.len() }

    pub fn is_closed(&self) -> bool { self.0.listeners.read().expect("listeners lock is poisoned").closed }

    /// Unsubscribes every listener and refuses new subscriptions. Later emits are no-ops.
    pub fn close(&self) {
        let entries = {
            let mut listeners = self.0.listeners.write().expect("listeners lock is poisoned");
            if listeners.closed {
                return;
            }
            listeners.closed = true;
            std::mem::take(&mut listeners.entries)
        };
        debug!("Signal closed, releasing {} listeners", entries.len());
        for listener in entries.into_values() {
            Listener(listener).unsubscribe();
        }
    }

    fn snapshot(&self) -> Vec<Arc<listener::Inner<T>>> {
        // Clone the listeners to avoid holding the lock while handing off values
        let listeners = self.0.listeners.read().expect("listeners lock is poisoned");
        listeners.entries.values().cloned().collect()
    }
}

impl<T> Signal<T>
where T: Clone + Send + 'static
{
    pub fn new() -> Self {
        Self(Arc::new(Inner { listeners: RwLock::new(ListenerSet { entries: BTreeMap::new(), closed: false }), next_id: AtomicUsize::new(0) }))
    }

    /// Subscribes a callback to every value emitted from now on.
    ///
    /// Returns without waiting for the listener's delivery thread to start. If the subscription cannot be
    /// established (the signal is closed, or no thread could be spawned) the returned listener is already
    /// `Terminated`; use [`try_subscribe`](Signal::try_subscribe) to observe the reason.
    pub fn subscribe<C>(&self, callback: C) -> Listener<T>
    where C: IntoListenerCallback<T> {
        self.attach_or_terminated(callback.into_listener_callback(), Delivery::Continuous)
    }

    /// Like [`subscribe`](Signal::subscribe), but the listener unsubscribes itself right after its callback
    /// has been invoked once. Values emitted after that first one are never delivered.
    pub fn subscribe_once<C>(&self, callback: C) -> Listener<T>
    where C: IntoListenerCallback<T> {
        self.attach_or_terminated(callback.into_listener_callback(), Delivery::Once)
    }

    pub fn try_subscribe<C>(&self, callback: C) -> Result<Listener<T>, SignalError>
    where C: IntoListenerCallback<T> {
        self.attach(callback.into_listener_callback(), Delivery::Continuous)
    }

    pub fn try_subscribe_once<C>(&self, callback: C) -> Result<Listener<T>, SignalError>
    where C: IntoListenerCallback<T> {
        self.attach(callback.into_listener_callback(), Delivery::Once)
    }

    /// Hands `value` to every listener subscribed at the time of the call, in subscription order.
    ///
    /// Blocks until each listener's queue has accepted the value. Listeners subscribed during the call
    /// do not see this value. Listeners unsubscribed during the call never pass it to their callback.
    ///
    /// Safe to call from any thread, including an async runtime worker, where the wait blocks that worker.
    /// [`emit_async`](Signal::emit_async) waits without blocking.
    pub fn emit(&self, value: T) {
        let listeners = self.snapshot();
        trace!("Signal emitting to {} listeners", listeners.len());

        // clone the value for each listener except the last one
        if let Some((last, rest)) = listeners.split_last() {
            for listener in rest {
                listener.offer(value.clone());
            }
            last.offer(value);
        }
    }

    /// Same as [`emit`](Signal::emit), but awaits queue capacity instead of blocking the thread
    #[cfg(feature = "async")]
    pub async fn emit_async(&self, value: T) {
        let listeners = self.snapshot();
        trace!("Signal emitting to {} listeners", listeners.len());

        if let Some((last, rest)) = listeners.split_last() {
            for listener in rest {
                listener.offer_async(value.clone()).await;
            }
            last.offer_async(value).await;
        }
    }

    fn attach_or_terminated(&self, callback: ListenerCallback<T>, delivery: Delivery) -> Listener<T> {
        match self.attach(callback, delivery) {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Signal failed to subscribe listener: {}", e);
                Listener::terminated(self.next_id())
            }
        }
    }

    fn attach(&self, callback: ListenerCallback<T>, delivery: Delivery) -> Result<Listener<T>, SignalError> {
        if self.is_closed() {
            return Err(SignalError::Closed);
        }

        let id = self.next_id();
        let listener = Listener::spawn(id, Arc::downgrade(&self.0), callback, delivery)?;

        {
            let mut listeners = self.0.listeners.write().expect("listeners lock is poisoned");
            if !listeners.closed {
                listeners.entries.insert(id, listener.0.clone());
                debug!("Signal subscribed listener {} ({:?})", id, delivery);
                return Ok(listener);
            }
        }

        // closed while the delivery thread was starting
        listener.unsubscribe();
        Err(SignalError::Closed)
    }

    fn next_id(&self) -> ListenerId { ListenerId(self.0.next_id.fetch_add(1, Ordering::Relaxed)) }
}

impl<T> Inner<T> {
    pub(crate) fn remove(&self, id: ListenerId) {
        if self.listeners.write().expect("listeners lock is poisoned").entries.remove(&id).is_some() {
            trace!("Signal removed listener {}", id);
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.listeners.get_mut().unwrap_or_else(PoisonError::into_inner).entries);
        for listener in entries.into_values() {
            debug!("Signal dropped, releasing listener {}", listener.id());
            Listener(listener).unsubscribe();
        }
    }
}

// IntoListenerCallback implementations for various types

// Implementation for closures
impl<F, T> IntoListenerCallback<T> for F
where F: FnMut(T) + Send + 'static
{
    fn into_listener_callback(self) -> ListenerCallback<T> { Box::new(self) }
}

impl<T: Send + 'static> IntoListenerCallback<T> for std::sync::mpsc::Sender<T> {
    fn into_listener_callback(self) -> ListenerCallback<T> {
        Box::new(move |value| {
            let _ = self.send(value); // Ignore send errors
        })
    }
}

#[cfg(feature = "async")]
impl<T: Send + 'static> IntoListenerCallback<T> for tokio::sync::mpsc::UnboundedSender<T> {
    fn into_listener_callback(self) -> ListenerCallback<T> {
        Box::new(move |value| {
            let _ = self.send(value); // Ignore send errors
        })
    }
}
