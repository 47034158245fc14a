//! One-shot settlement slot shared between a spawner and its coroutine.
//!
//! A promise is monotonic: it advances Pending → Ready or Pending → Failed
//! exactly once, and both transitions are final. That monotonicity is what
//! makes the poll-and-yield loop in [`Promise::get`] correct without any
//! waiter bookkeeping between coroutines.

use crate::capsule::Capsule;
use crate::coroutine;
use crate::error::{AwaitError, FaultInfo};
use crate::scheduler;
use parking_lot::Mutex;
use std::sync::Arc;

enum State<T> {
    Pending,
    Ready(T),
    Failed(Arc<Capsule>),
}

/// One-shot result slot: value, failure, or pending.
///
/// Settlement from a worker-pool thread is visible to awaiters on other
/// threads through the internal lock; cooperative awaiters observe it on
/// their next poll.
pub struct Promise<T> {
    state: Mutex<State<T>>,
}

impl<T> Promise<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::Pending),
        })
    }

    /// Whether the promise has settled (value or failure).
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.lock(), State::Pending)
    }

    /// Whether the promise settled with a captured fault.
    pub fn has_failure(&self) -> bool {
        matches!(*self.state.lock(), State::Failed(_))
    }

    /// Settle with a value. Settling twice is a caller bug.
    pub(crate) fn set_value(&self, value: T) {
        let mut state = self.state.lock();
        assert!(
            matches!(*state, State::Pending),
            "promise already settled"
        );
        *state = State::Ready(value);
    }

    /// Settle with a captured fault. Settling twice is a caller bug.
    pub(crate) fn set_failure(&self, capsule: Arc<Capsule>) {
        let mut state = self.state.lock();
        assert!(
            matches!(*state, State::Pending),
            "promise already settled"
        );
        *state = State::Failed(capsule);
    }
}

impl<T: Clone> Promise<T> {
    /// Non-blocking read. `None` while pending; any number of awaiters can
    /// read a settled promise.
    pub fn try_get(&self) -> Option<Result<T, AwaitError>> {
        match &*self.state.lock() {
            State::Pending => None,
            State::Ready(value) => Some(Ok(value.clone())),
            State::Failed(capsule) => Some(Err(AwaitError::Faulted(fault_info(capsule)))),
        }
    }

    /// Read the settlement, waiting cooperatively if needed.
    ///
    /// Inside a coroutine whose scheduler is running, this yields between
    /// polls until the promise settles. Outside a coroutine a pending
    /// promise fails with [`AwaitError::NotReady`]. After settlement it
    /// returns the value or re-raises the captured fault as
    /// [`AwaitError::Faulted`].
    pub fn get(&self) -> Result<T, AwaitError> {
        loop {
            if let Some(result) = self.try_get() {
                return result;
            }
            if scheduler::in_coroutine() {
                coroutine::yield_execution();
            } else {
                return Err(AwaitError::NotReady);
            }
        }
    }
}

fn fault_info(capsule: &Capsule) -> FaultInfo {
    capsule.fault_info().unwrap_or_else(|| {
        FaultInfo::new(
            crate::capsule::FaultKind::User,
            "unknown fault".to_string(),
            None,
        )
    })
}
