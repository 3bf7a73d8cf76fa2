use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Signal is closed")]
    Closed,
    #[error("Failed to spawn listener delivery thread: {0}")]
    Spawn(#[from] std::io::Error),
}
