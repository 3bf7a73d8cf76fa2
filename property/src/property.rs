use std::any::Any;
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::comparable::{Comparable, Comparator};
use crate::signal::Signal;

/// A mutable value that announces every change on its [`Signal`].
///
/// Setting a value equal to the current one stores it but emits nothing. Equality is decided by the
/// strategy chosen at construction: the value type's `PartialEq` ([`Property::new`]) or its
/// [`Comparable`] implementation ([`Property::comparable`]). Either way the result is the same
/// `Property<T>` type.
///
/// Cloning a `Property` yields another handle to the same value and signal. Dropping the last handle
/// releases every listener, except that a callback holding a clone of the property is itself a handle:
/// unsubscribe it explicitly, or hold it in a [`ListenerGuard`](crate::ListenerGuard).
pub struct Property<T>(Arc<Inner<T>>);

struct Inner<T> {
    value: RwLock<T>,
    comparator: Comparator<T>,
    signal: Signal<T>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Property<T>
where T: Clone + Send + 'static
{
    /// Creates a property compared with the value type's own `PartialEq`
    pub fn new(value: T) -> Self
    where T: PartialEq {
        Self::with_comparator(value, Comparator::native())
    }

    /// Creates a property compared with the value type's [`Comparable`] implementation
    pub fn comparable(value: T) -> Self
    where T: Comparable {
        Self::with_comparator(value, Comparator::custom())
    }

    fn with_comparator(value: T, comparator: Comparator<T>) -> Self {
        Self(Arc::new(Inner { value: RwLock::new(value), comparator, signal: Signal::new() }))
    }

    /// Returns a clone of the current value
    pub fn get(&self) -> T { self.0.value.read().expect("value lock is poisoned").clone() }

    /// Stores `value`, and if it differs from the current value, emits it on the changed signal.
    ///
    /// Returns once every listener's queue has accepted the value (see [`Signal::emit`]).
    pub fn set(&self, value: T) {
        if let Some(value) = self.replace(value) {
            self.0.signal.emit(value);
        }
    }

    /// Same as [`set`](Property::set), but awaits listener queue capacity instead of blocking the thread
    #[cfg(feature = "async")]
    pub async fn set_async(&self, value: T) {
        if let Some(value) = self.replace(value) {
            self.0.signal.emit_async(value).await;
        }
    }

    /// The signal on which every change of this property is emitted
    pub fn changed_signal(&self) -> &Signal<T> { &self.0.signal }

    /// Stores `value` unconditionally. Returns a copy to emit if it was not equal to the previous value.
    fn replace(&self, value: T) -> Option<T> {
        let mut current = self.0.value.write().expect("value lock is poisoned");
        let changed = !self.0.comparator.equals(&current, &value);
        *current = value;
        if !changed {
            trace!("Property set to an equal value, not emitting");
        }
        changed.then(|| current.clone())
    }
}

impl<T: 'static> Property<T> {
    /// Calls a closure with a borrow of the current value
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.0.value.read().expect("value lock is poisoned");
        f(&guard)
    }

    /// Whether `other` equals the current value under this property's equality strategy.
    /// A value of a different type is never equal.
    pub fn equals(&self, other: &dyn Any) -> bool { self.with(|current| self.0.comparator.equals(current, other)) }
}

impl<T: 'static> Comparable for Property<T> {
    fn equals(&self, other: &dyn Any) -> bool { Property::equals(self, other) }
}

impl<T> Default for Property<T>
where T: Clone + Send + PartialEq + Default + 'static
{
    fn default() -> Self { Self::new(T::default()) }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.0.value.read().expect("value lock is poisoned");
        f.debug_struct("Property")
            .field("value", &*value)
            .field("comparator", &self.0.comparator)
            .field("listeners", &self.0.signal.listener_count())
            .finish()
    }
}

impl<T: std::fmt::Display + 'static> std::fmt::Display for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.with(|v| write!(f, "{}", v)) }
}
