use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use tracing::Level;

#[allow(unused)]
pub const TIMEOUT: Duration = Duration::from_secs(5);
// how long to wait before concluding that no further values are coming
#[allow(unused)]
pub const SETTLE: Duration = Duration::from_millis(100);

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::DEBUG).with_test_writer().init(); }

/// Collects the values a callback was invoked with
#[allow(unused)]
pub struct Watch<T>(Receiver<T>);

#[allow(unused)]
pub fn watcher<T: Send + 'static>() -> (Box<dyn FnMut(T) + Send>, Watch<T>) {
    let (tx, rx) = mpsc::channel();
    let watcher = Box::new(move |value: T| {
        let _ = tx.send(value);
    });
    (watcher, Watch(rx))
}

#[allow(unused)]
impl<T> Watch<T> {
    /// Waits for the next `count` values, then checks that no more arrive
    pub fn expect(&self, count: usize) -> Vec<T> {
        let values = self.take(count);
        assert!(self.0.recv_timeout(SETTLE).is_err(), "callback invoked more than {count} times");
        values
    }

    /// Waits for the next `count` values
    pub fn take(&self, count: usize) -> Vec<T> {
        (0..count).map(|i| self.0.recv_timeout(TIMEOUT).unwrap_or_else(|_| panic!("timed out waiting for value {}", i + 1))).collect()
    }

    /// Everything that arrives before the callback goes quiet
    pub fn drain(&self) -> Vec<T> {
        let mut values = Vec::new();
        while let Ok(value) = self.0.recv_timeout(SETTLE) {
            values.push(value);
        }
        values
    }
}
