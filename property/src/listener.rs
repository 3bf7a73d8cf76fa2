use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::ThreadId;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::error::SignalError;
use crate::signal::{self, ListenerCallback};

/// Identifies a listener within the signal it subscribed to.
/// Ids are handed out in subscription order, which is also the order of delivery.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) usize);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Lifecycle of a listener. Transitions only move forward: `Active` -> `Unsubscribing` -> `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Registered with its signal, delivery loop running
    Active,
    /// Removal requested and queue closing; the delivery loop has not yet exited
    Unsubscribing,
    /// Removed from its signal and the delivery loop has exited
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Continuous,
    /// Unsubscribe after the first value reaches the callback
    Once,
}

/// A handle to one subscription of a [`Signal`](crate::Signal).
///
/// Each listener owns a single-slot queue drained by its own delivery thread, which invokes the
/// subscribed callback once per value in the order the values were emitted.
///
/// Dropping a `Listener` does not unsubscribe it. Call [`unsubscribe`](Listener::unsubscribe) (any number
/// of times, from any thread, including from inside the callback) or convert it into a
/// [`ListenerGuard`] with [`guard`](Listener::guard).
pub struct Listener<T>(pub(crate) Arc<Inner<T>>);

pub(crate) struct Inner<T> {
    id: ListenerId,
    state: Mutex<ListenerState>,
    terminated: Condvar,
    // Taken on release. The queue closes once in-flight emits drop their clones.
    sender: Mutex<Option<mpsc::Sender<T>>>,
    // Back-reference used for removal, cleared on unsubscribe
    signal: Mutex<Option<Weak<signal::Inner<T>>>>,
    thread: OnceLock<ThreadId>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> std::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("id", &self.0.id).field("state", &self.state()).finish()
    }
}

impl<T> Listener<T> {
    pub fn id(&self) -> ListenerId { self.0.id }

    pub fn state(&self) -> ListenerState { *self.0.state.lock().expect("state lock is poisoned") }

    pub fn is_active(&self) -> bool { self.state() == ListenerState::Active }

    /// Removes this listener from its signal and closes its queue. No value reaches the callback afterwards,
    /// even one that was already queued. Subsequent calls are no-ops.
    pub fn unsubscribe(&self) {
        if !self.0.release() {
            return;
        }
        let signal = self.0.signal.lock().expect("signal lock is poisoned").take();
        if let Some(signal) = signal.and_then(|signal| signal.upgrade()) {
            signal.remove(self.0.id);
        }
        debug!("Listener {} unsubscribed", self.0.id);
    }

    /// Blocks until the delivery loop has exited and the listener is `Terminated`.
    ///
    /// Returns immediately when called from this listener's own callback, since the loop cannot exit
    /// while the callback is still running.
    pub fn join(&self) {
        if self.0.thread.get() == Some(&std::thread::current().id()) {
            return;
        }
        let mut state = self.0.state.lock().expect("state lock is poisoned");
        while *state != ListenerState::Terminated {
            state = self.0.terminated.wait(state).expect("state lock is poisoned");
        }
    }

    /// Ties the subscription to the returned guard: dropping the guard unsubscribes.
    pub fn guard(self) -> ListenerGuard<T> { ListenerGuard(self) }

    /// A listener that never delivers anything, handed out when a subscription could not be established
    pub(crate) fn terminated(id: ListenerId) -> Self {
        Self(Arc::new(Inner {
            id,
            state: Mutex::new(ListenerState::Terminated),
            terminated: Condvar::new(),
            sender: Mutex::new(None),
            signal: Mutex::new(None),
            thread: OnceLock::new(),
        }))
    }
}

impl<T: Send + 'static> Listener<T> {
    /// Creates an active listener and starts its delivery thread
    pub(crate) fn spawn(
        id: ListenerId,
        signal: Weak<signal::Inner<T>>,
        callback: ListenerCallback<T>,
        delivery: Delivery,
    ) -> Result<Self, SignalError> {
        let (sender, receiver) = mpsc::channel(1);
        let listener = Self(Arc::new(Inner {
            id,
            state: Mutex::new(ListenerState::Active),
            terminated: Condvar::new(),
            sender: Mutex::new(Some(sender)),
            signal: Mutex::new(Some(signal)),
            thread: OnceLock::new(),
        }));

        let worker = listener.clone();
        std::thread::Builder::new().name(format!("property-listener-{id}")).spawn(move || worker.run(receiver, callback, delivery))?;

        Ok(listener)
    }

    fn run(self, mut receiver: mpsc::Receiver<T>, mut callback: ListenerCallback<T>, delivery: Delivery) {
        let _ = self.0.thread.set(std::thread::current().id());

        while let Some(value) = receiver.blocking_recv() {
            // queued before an unsubscribe landed
            if !self.is_active() {
                break;
            }
            trace!("Listener {} delivering value", self.0.id);
            self.invoke(&mut callback, value);
            if delivery == Delivery::Once {
                self.unsubscribe();
                break;
            }
        }

        // Dropping the receiver fails any emit still waiting on this queue
        drop(receiver);
        self.unsubscribe();
        self.0.terminate();
        debug!("Listener {} terminated", self.0.id);
    }

    fn invoke(&self, callback: &mut ListenerCallback<T>, value: T) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
            error!("Listener {} callback panicked: {}", self.0.id, panic_message(&*payload));
        }
    }
}

impl<T> Inner<T> {
    pub(crate) fn id(&self) -> ListenerId { self.id }

    /// Moves an active listener to `Unsubscribing` and drops its queue sender.
    /// Returns false if the listener was already released.
    fn release(&self) -> bool {
        {
            let mut state = self.state.lock().expect("state lock is poisoned");
            if *state != ListenerState::Active {
                return false;
            }
            *state = ListenerState::Unsubscribing;
        }
        self.sender.lock().expect("sender lock is poisoned").take();
        true
    }

    fn terminate(&self) {
        *self.state.lock().expect("state lock is poisoned") = ListenerState::Terminated;
        self.terminated.notify_all();
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> { self.sender.lock().expect("sender lock is poisoned").clone() }

    /// Hands a value to this listener's queue, blocking while the queue is full.
    /// Values for released listeners are dropped.
    ///
    /// The wait parks the calling thread without consulting tokio's runtime context, so it is also safe on
    /// a runtime worker. The delivery loop runs on its own thread and drains the queue regardless.
    /// `unconstrained` keeps an exhausted task budget from turning the wait into a spin.
    pub(crate) fn offer(&self, value: T) {
        let Some(sender) = self.sender() else { return };
        if futures::executor::block_on(tokio::task::unconstrained(sender.send(value))).is_err() {
            trace!("Listener {} queue closed before delivery", self.id);
        }
    }

    #[cfg(feature = "async")]
    pub(crate) async fn offer_async(&self, value: T) {
        let Some(sender) = self.sender() else { return };
        if sender.send(value).await.is_err() {
            trace!("Listener {} queue closed before delivery", self.id);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Unsubscribes its listener when dropped
pub struct ListenerGuard<T>(Listener<T>);

impl<T> ListenerGuard<T> {
    pub fn listener(&self) -> &Listener<T> { &self.0 }
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) { self.0.unsubscribe(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_terminated_listener_is_inert() {
        let listener = Listener::<i32>::terminated(ListenerId(7));
        assert_eq!(listener.id(), ListenerId(7));
        assert_eq!(listener.state(), ListenerState::Terminated);

        // nothing to release, nothing to wait for
        listener.unsubscribe();
        listener.join();
        assert_eq!(listener.state(), ListenerState::Terminated);
    }

    #[test]
    fn test_state_transitions_on_unsubscribe() {
        let signal = Signal::<i32>::new();
        let listener = signal.subscribe(|_: i32| {});
        assert_eq!(listener.state(), ListenerState::Active);
        assert_eq!(signal.listener_count(), 1);

        listener.unsubscribe();
        assert_ne!(listener.state(), ListenerState::Active);
        assert_eq!(signal.listener_count(), 0);

        listener.join();
        assert_eq!(listener.state(), ListenerState::Terminated);

        // terminal state is absorbing
        listener.unsubscribe();
        assert_eq!(listener.state(), ListenerState::Terminated);
    }

    #[test]
    fn test_double_unsubscribe_from_many_threads() {
        let signal = Signal::<i32>::new();
        let listener = signal.subscribe(|_: i32| {});

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let listener = listener.clone();
                std::thread::spawn(move || listener.unsubscribe())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        listener.join();
        assert_eq!(listener.state(), ListenerState::Terminated);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_join_from_own_callback_returns() {
        let signal = Signal::<i32>::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let slot: Arc<Mutex<Option<Listener<i32>>>> = Arc::new(Mutex::new(None));

        let listener = {
            let slot = slot.clone();
            signal.subscribe(move |value: i32| {
                if let Some(listener) = slot.lock().unwrap().as_ref() {
                    listener.join();
                }
                tx.send(value).unwrap();
            })
        };
        *slot.lock().unwrap() = Some(listener.clone());

        signal.emit(1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        listener.unsubscribe();
        listener.join();
    }

    #[test]
    fn test_guard_unsubscribes_on_drop() {
        let signal = Signal::<i32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let guard = {
            let calls = calls.clone();
            signal.subscribe(move |_: i32| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }
        .guard();
        let listener = guard.listener().clone();
        assert!(listener.is_active());

        drop(guard);
        listener.join();
        assert_eq!(listener.state(), ListenerState::Terminated);

        signal.emit(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
