//! Coroutines: stackful execution contexts multiplexed by a scheduler.
//!
//! A coroutine owns one execution context, one exception capsule, its
//! lifecycle state, and the bound function it runs. Once running it always
//! reaches one of: yield, suspend-for-I/O, timed sleep, normal return, or a
//! fault; each of those hands control back to the scheduler's main context.

use crate::capsule::Capsule;
use crate::context::{ExecutionContext, Suspender, SwitchOutcome};
use crate::scheduler;
use crate::trace::trace;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a coroutine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CoroutineId(u64);

static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(1);

impl CoroutineId {
    pub(crate) fn next() -> Self {
        CoroutineId(NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Lifecycle state of a coroutine.
///
/// Transitions: Ready → Running (resume); Running → Suspended (yield, sleep,
/// suspend-for-I/O); Running → Finished (return or fault); Suspended → Ready
/// (timer expiry, completion delivery, or the scheduler's rescan). Finished
/// is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum CoroutineState {
    /// Queued and waiting for the loop to switch into it.
    Ready,
    /// Currently executing; at most one per scheduler.
    Running,
    /// Handed control back to the loop.
    Suspended,
    /// Returned or faulted; awaiting retirement.
    Finished,
}

pub(crate) type DoneCallback = Box<dyn FnOnce(Arc<Capsule>)>;

/// A stackful coroutine owned by its scheduler.
///
/// Only the owning scheduler switches into a coroutine, always from its main
/// context; coroutines never switch directly into one another.
pub(crate) struct Coroutine {
    id: CoroutineId,
    state: Cell<CoroutineState>,
    ctx: RefCell<Option<ExecutionContext>>,
    capsule: Arc<Capsule>,
    suspender: Cell<Option<Suspender>>,
    /// Invoked by the scheduler after retirement; typically transfers the
    /// capsule into the promise.
    on_done: RefCell<Option<DoneCallback>>,
    /// Type-erased anchor keeping the promise alive as long as the
    /// coroutine exists.
    promise_anchor: RefCell<Option<Box<dyn Any>>>,
    /// Parked on the reactor; the scheduler's rescan must not revive it.
    io_parked: Cell<bool>,
    /// Set while the owning scheduler tears the coroutine down, so the
    /// trampoline lets the forced unwind pass through untouched.
    tearing_down: Cell<bool>,
}

impl Coroutine {
    /// Build a coroutine around `func`. The entry trampoline records the
    /// suspender, runs `func` under a panic handler, marks the coroutine
    /// finished, and switches back to the loop.
    pub(crate) fn new(func: Box<dyn FnOnce()>, on_done: Option<DoneCallback>) -> Rc<Self> {
        let co = Rc::new(Self {
            id: CoroutineId::next(),
            state: Cell::new(CoroutineState::Ready),
            ctx: RefCell::new(None),
            capsule: Arc::new(Capsule::new()),
            suspender: Cell::new(None),
            on_done: RefCell::new(on_done),
            promise_anchor: RefCell::new(None),
            io_parked: Cell::new(false),
            tearing_down: Cell::new(false),
        });
        let entry = Rc::downgrade(&co);
        let ctx = ExecutionContext::new(move |suspender| trampoline(&entry, suspender, func));
        *co.ctx.borrow_mut() = Some(ctx);
        co
    }

    pub(crate) fn id(&self) -> CoroutineId {
        self.id
    }

    pub(crate) fn state(&self) -> CoroutineState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: CoroutineState) {
        self.state.set(state);
    }

    pub(crate) fn capsule(&self) -> &Arc<Capsule> {
        &self.capsule
    }

    pub(crate) fn suspender(&self) -> Option<Suspender> {
        self.suspender.get()
    }

    pub(crate) fn io_parked(&self) -> bool {
        self.io_parked.get()
    }

    pub(crate) fn set_io_parked(&self, parked: bool) {
        self.io_parked.set(parked);
    }

    pub(crate) fn set_promise_anchor(&self, anchor: Box<dyn Any>) {
        *self.promise_anchor.borrow_mut() = Some(anchor);
    }

    /// Switch into the coroutine from the scheduler's main context.
    pub(crate) fn switch_in(&self) -> SwitchOutcome {
        let mut ctx = self.ctx.borrow_mut();
        let ctx = ctx
            .as_mut()
            .expect("execution context exists until retirement");
        ctx.switch_in()
    }

    /// Run the retirement callback, handing it the capsule.
    pub(crate) fn run_on_done(&self) {
        if let Some(callback) = self.on_done.borrow_mut().take() {
            callback(self.capsule.clone());
        }
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        self.tearing_down.set(true);
        // Dropping the context force-unwinds a still-suspended stack; the
        // trampoline re-raises that sentinel so the backend can finish.
        self.ctx.borrow_mut().take();
    }
}

/// Entry stub for every coroutine stack.
///
/// Holds only a weak reference across the body: the coroutine's own stack
/// must not keep the coroutine alive, or retirement could never free it.
fn trampoline(co: &Weak<Coroutine>, suspender: Suspender, func: Box<dyn FnOnce()>) {
    if let Some(this) = co.upgrade() {
        this.suspender.set(Some(suspender));
    }
    let result = panic::catch_unwind(AssertUnwindSafe(func));
    if let Err(payload) = result {
        // During teardown the upgrade fails (the owner is mid-drop) and the
        // forced unwind must continue past us to the context backend.
        let tearing_down = co.upgrade().map_or(true, |c| c.tearing_down.get());
        if tearing_down {
            panic::resume_unwind(payload);
        }
        if let Some(this) = co.upgrade() {
            this.capsule.capture_panic(payload);
            trace!("coroutine {} captured a fault", this.id.as_u64());
        }
    }
    if let Some(this) = co.upgrade() {
        this.state.set(CoroutineState::Finished);
        this.suspender.set(None);
    }
    // Returning from the entry switches back to the scheduler's context.
}

/// Voluntarily hand control back to the scheduler.
///
/// The current coroutine goes to the back of the line: the scheduler's
/// rescan re-queues any suspended coroutine that is neither sleeping on the
/// timer wheel nor parked on the reactor. No-op outside a coroutine.
pub fn yield_execution() {
    switch_to_loop(false);
}

/// Park the current coroutine with no re-queue plan.
///
/// The caller must have arranged revival, typically by submitting a reactor
/// operation tagged with this coroutine, whose completion re-queues it.
/// No-op outside a coroutine.
pub fn suspend_execution() {
    switch_to_loop(true);
}

fn switch_to_loop(park_on_reactor: bool) {
    let Some(core) = scheduler::current_core() else {
        return;
    };
    let Some(co) = core.running() else {
        return;
    };
    if park_on_reactor {
        co.set_io_parked(true);
    }
    if co.state() != CoroutineState::Finished {
        co.set_state(CoroutineState::Suspended);
    }
    let suspender = co
        .suspender()
        .expect("running coroutine has a suspender");
    // The suspender belongs to this coroutine's live stack and we are
    // executing on that stack right now.
    unsafe { suspender.switch_out() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_trampoline_marks_finished() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let co = Coroutine::new(Box::new(move || flag.set(true)), None);
        assert_eq!(co.state(), CoroutineState::Ready);

        let outcome = co.switch_in();
        assert_eq!(outcome, crate::context::SwitchOutcome::Finished);
        assert!(ran.get());
        assert_eq!(co.state(), CoroutineState::Finished);
        assert!(!co.capsule().has_failure());
    }

    #[test]
    fn test_trampoline_captures_fault() {
        let co = Coroutine::new(Box::new(|| panic!("kaboom")), None);
        let prev = std::panic::take_hook();
        // Silence the default report; no scheduler intercept in this test.
        std::panic::set_hook(Box::new(|_| {}));
        co.switch_in();
        std::panic::set_hook(prev);

        assert_eq!(co.state(), CoroutineState::Finished);
        assert!(co.capsule().has_failure());
        assert_eq!(co.capsule().message().as_deref(), Some("kaboom"));
    }

    #[test]
    fn test_drop_of_unstarted_coroutine() {
        let co = Coroutine::new(Box::new(|| {}), None);
        drop(co);
    }

    #[test]
    fn test_yield_outside_coroutine_is_noop() {
        yield_execution();
        suspend_execution();
    }

    #[test]
    fn test_on_done_receives_capsule() {
        let seen = Rc::new(Cell::new(false));
        let flag = seen.clone();
        let co = Coroutine::new(
            Box::new(|| {}),
            Some(Box::new(move |capsule| flag.set(!capsule.has_failure()))),
        );
        co.switch_in();
        co.run_on_done();
        assert!(seen.get());
    }
}
