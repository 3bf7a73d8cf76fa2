/*!
Observable properties for ankurah

A [`Property`] is a mutable value cell with change notification. Setting a new value compares it
against the current one; only a real change is broadcast on the property's [`Signal`], which hands the
value to every subscribed [`Listener`].

# Design requirements:
- Value types participate either through `PartialEq` or by implementing [`Comparable`], and both kinds of
  property are the same type to callers
- A mismatched-type comparison is "not equal", never an error
- Every listener runs its callback on its own delivery thread, so a slow callback never blocks
  subscription bookkeeping
- Subscribe, unsubscribe and emit may race freely; emit works on a snapshot of the listener set
- Unsubscribing is idempotent and allowed from inside the listener's own callback

# Basic usage

```rust
use ankurah_property::*;

let property = Property::new(0);
let (tx, rx) = std::sync::mpsc::channel::<i32>();
let listener = property.changed_signal().subscribe(tx);

property.set(42);
property.set(42); // equal to the current value - nothing is emitted
assert_eq!(property.get(), 42);
assert_eq!(rx.recv().unwrap(), 42);

listener.unsubscribe();
property.set(43);
assert!(rx.recv().is_err()); // the listener's sender was dropped with its callback
```

# Back-pressure

Each listener's queue holds a single value. [`Property::set`] and [`Signal::emit`] block until every
listener has room for the new value, so a callback that never returns stalls every producer of the
property. Callbacks that panic are isolated: the panic is logged and the listener keeps receiving values.

Both are safe to call on an async runtime worker, where the wait blocks that worker thread;
[`Property::set_async`] / [`Signal::emit_async`] wait without blocking it.
*/

mod comparable;
mod error;
mod listener;
mod property;
mod signal;

pub use comparable::*;
pub use error::*;
pub use listener::{Listener, ListenerGuard, ListenerId, ListenerState};
pub use property::*;
pub use signal::{IntoListenerCallback, ListenerCallback, Signal};
