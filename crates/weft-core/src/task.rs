//! Task sugar: spawn from inside a coroutine and await the result.
//!
//! A task is a promise-holding handle for a coroutine spawned by another
//! coroutine on the same scheduler. Awaiting polls the promise and yields
//! between polls, so any number of coroutines can await any number of tasks
//! with no waiter bookkeeping.

use crate::error::{AwaitError, SchedulerError};
use crate::promise::Promise;
use crate::scheduler;
use std::sync::Arc;

/// Handle for awaiting a coroutine's result.
pub struct TaskHandle<T> {
    promise: Arc<Promise<T>>,
}

impl<T> TaskHandle<T> {
    /// The underlying promise.
    pub fn promise(&self) -> &Arc<Promise<T>> {
        &self.promise
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Await the task: poll its promise, yielding between polls, then
    /// return its value or re-raise its captured fault.
    pub fn join(&self) -> Result<T, AwaitError> {
        self.promise.get()
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

/// Spawn `func` as a coroutine on the current scheduler.
///
/// Restricted to an in-coroutine caller; fails with
/// [`SchedulerError::NotInCoroutine`] otherwise.
pub fn create_task<T, F>(func: F) -> Result<TaskHandle<T>, SchedulerError>
where
    T: 'static,
    F: FnOnce() -> T + 'static,
{
    let core = scheduler::current_core().ok_or(SchedulerError::NotInCoroutine)?;
    if core.running().is_none() {
        return Err(SchedulerError::NotInCoroutine);
    }
    Ok(TaskHandle {
        promise: core.spawn_internal(func),
    })
}
