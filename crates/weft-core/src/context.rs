//! Stack-switching execution context.
//!
//! Wraps the stackful-coroutine backend behind the three primitives the
//! scheduler needs: construct with an entry function, switch in, and destroy
//! (on drop). The rest of the crate never names the backend.
//!
//! Every hop is routed through the scheduler's own context: a coroutine
//! switches to the loop, never directly into another coroutine.

use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::ptr::NonNull;

/// Outcome of switching into a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwitchOutcome {
    /// The context suspended itself; it can be switched into again.
    Suspended,
    /// The entry function returned; the context cannot be resumed.
    Finished,
}

/// Handle for switching out of a running context back to its resumer.
#[derive(Clone, Copy)]
pub(crate) struct Suspender {
    raw: NonNull<Yielder<(), ()>>,
}

impl Suspender {
    /// Switch back to whatever called [`ExecutionContext::switch_in`].
    ///
    /// # Safety
    ///
    /// Must be called on the stack of the context this suspender was handed
    /// to, while that context is running. The suspender is invalidated once
    /// the entry function returns.
    pub(crate) unsafe fn switch_out(&self) {
        self.raw.as_ref().suspend(());
    }
}

/// An opaque per-coroutine stack plus the register state needed to switch
/// into and out of it. Dropping the context reclaims the stack; a stack
/// suspended mid-execution is force-unwound first.
pub(crate) struct ExecutionContext {
    inner: Coroutine<(), (), ()>,
}

impl ExecutionContext {
    /// Allocate a stack with an initial frame that calls `entry` when first
    /// switched into.
    pub(crate) fn new<F>(entry: F) -> Self
    where
        F: FnOnce(Suspender) + 'static,
    {
        let inner = Coroutine::new(move |yielder, ()| {
            entry(Suspender {
                raw: NonNull::from(yielder),
            });
        });
        Self { inner }
    }

    /// Save the caller's state and resume this context.
    pub(crate) fn switch_in(&mut self) -> SwitchOutcome {
        match self.inner.resume(()) {
            CoroutineResult::Yield(()) => SwitchOutcome::Suspended,
            CoroutineResult::Return(()) => SwitchOutcome::Finished,
        }
    }

}
