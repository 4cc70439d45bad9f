//! Construction-time errors.
//!
//! Steady-state operations (`post`, `sync`, `cancel`, timer `start`/`stop`)
//! never fail: a broken broker or queue just drops the work silently, per
//! the runtime's propagation policy. Only spinning up a new OS thread can
//! fail, so that's the only thing this type covers.

use std::fmt;

/// Errors raised while constructing runtime components.
#[derive(Debug)]
pub enum Error {
    /// `std::thread::Builder::spawn` failed, most likely due to resource
    /// exhaustion.
    SpawnWorker(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SpawnWorker(e) => write!(f, "failed to spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::SpawnWorker(e) => Some(e),
        }
    }
}
