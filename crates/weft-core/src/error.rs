//! Error types surfaced at scheduler and promise call sites.
//!
//! Scheduler misuse and registration failures are reported immediately where
//! they happen; faults raised inside a coroutine travel through the
//! [`Capsule`](crate::capsule::Capsule) instead and only surface here as
//! [`AwaitError::Faulted`] when an awaiter reads the settled promise.

use crate::capsule::FaultKind;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Errors surfaced immediately at scheduler call sites.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cooperative scheduler already exists on this thread.
    #[error("only one scheduler per thread is allowed")]
    SchedulerExists,

    /// No cooperative scheduler has been constructed on this thread.
    #[error("no cooperative scheduler on this thread")]
    NoScheduler,

    /// The operation requires a cooperative scheduler, not a worker pool.
    #[error("operation requires a cooperative scheduler")]
    NotCooperative,

    /// `submit` is only available on worker-pool schedulers.
    #[error("submit is only for worker-pool schedulers")]
    NotAPool,

    /// The operation must be called from inside a running coroutine.
    #[error("must be called from within a running coroutine")]
    NotInCoroutine,

    /// The handle was never bound to the reactor with `register_handle`.
    #[error("handle {0} is not registered with the reactor")]
    UnregisteredHandle(RawFd),

    /// Binding the handle to the completion facility failed.
    #[error("failed to register handle: {0}")]
    Register(#[from] io::Error),

    /// The worker pool has already been stopped.
    #[error("worker pool is stopped")]
    PoolStopped,
}

/// Errors surfaced when reading a promise.
#[derive(Debug, Error)]
pub enum AwaitError {
    /// The promise is pending and the caller is not inside a coroutine, so
    /// there is no loop to yield to while waiting.
    #[error("result not ready")]
    NotReady,

    /// The producing coroutine faulted; the captured fault is re-raised at
    /// the awaiter as this error.
    #[error("{0}")]
    Faulted(FaultInfo),
}

/// Summary of a captured fault, detached from its panic payload.
#[derive(Debug, Clone)]
pub struct FaultInfo {
    kind: FaultKind,
    message: String,
    location: Option<String>,
}

impl FaultInfo {
    pub(crate) fn new(kind: FaultKind, message: String, location: Option<String>) -> Self {
        Self {
            kind,
            message,
            location,
        }
    }

    /// Category of the captured fault.
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The fault's message, exactly as raised.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// `file:line:column` of the fault site, when the intercept saw it.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
