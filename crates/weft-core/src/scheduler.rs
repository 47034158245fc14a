//! The cooperative scheduler and its worker-pool flavor.
//!
//! A cooperative scheduler multiplexes coroutines over the one thread it was
//! constructed on: it owns the ready queue, timer wheel, sleeping set, and
//! completion reactor, and drives the main loop until no coroutines remain.
//! Constructing a second cooperative scheduler on a thread fails: the
//! per-thread singleton is what keeps the "current scheduler" thread-local
//! unambiguous and lets coroutines find their home loop with no argument
//! plumbing.
//!
//! The pool flavor owns no cooperative queues at all; it feeds a shared
//! thunk FIFO to worker threads that each host a private cooperative
//! scheduler of their own.

use crate::capsule::Capsule;
use crate::coroutine::{Coroutine, CoroutineId, CoroutineState, DoneCallback};
use crate::error::SchedulerError;
use crate::fault::{self, InterceptGuard};
use crate::pool::PoolShared;
use crate::promise::Promise;
use crate::reactor::{CompletionPort, IoOperation, IoWork};
use crate::timer::TimerWheel;
use crate::trace::trace;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Thread-local current scheduler
// ============================================================================

thread_local! {
    static CURRENT: RefCell<Option<Rc<CoopCore>>> = const { RefCell::new(None) };
}

/// The "current scheduler" pointer for this thread.
pub(crate) fn current_core() -> Option<Rc<CoopCore>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

/// Whether the caller is executing inside a running coroutine.
pub(crate) fn in_coroutine() -> bool {
    current_core().is_some_and(|core| core.running().is_some())
}

/// Capsule of the coroutine currently running on this thread, if any.
/// Read by the fault intercept at panic time.
pub(crate) fn running_capsule() -> Option<Arc<Capsule>> {
    current_core()?.running().map(|co| co.capsule().clone())
}

// ============================================================================
// Cooperative core
// ============================================================================

/// Internal state of one cooperative loop. Touched only from its own thread.
pub(crate) struct CoopCore {
    /// Every live coroutine, in spawn order. The scheduler is the sole owner.
    coroutines: RefCell<Vec<Rc<Coroutine>>>,
    /// FIFO of coroutines due to run on the next drain.
    ready: RefCell<VecDeque<Rc<Coroutine>>>,
    timers: RefCell<TimerWheel>,
    /// Membership test: is this coroutine parked on the timer wheel?
    sleeping: RefCell<FxHashSet<CoroutineId>>,
    running: RefCell<Option<Rc<Coroutine>>>,
    /// Capsule of the most recently faulted coroutine, until polled.
    deferred_fault: RefCell<Option<Arc<Capsule>>>,
    port: CompletionPort,
    _intercept: InterceptGuard,
}

impl CoopCore {
    fn new() -> Self {
        Self {
            coroutines: RefCell::new(Vec::new()),
            ready: RefCell::new(VecDeque::new()),
            timers: RefCell::new(TimerWheel::new()),
            sleeping: RefCell::new(FxHashSet::default()),
            running: RefCell::new(None),
            deferred_fault: RefCell::new(None),
            port: CompletionPort::new(),
            _intercept: fault::install(),
        }
    }

    pub(crate) fn running(&self) -> Option<Rc<Coroutine>> {
        self.running.borrow().clone()
    }

    /// Build a coroutine for `func`, enqueue it, and hand back its promise.
    pub(crate) fn spawn_internal<T, F>(&self, func: F) -> Arc<Promise<T>>
    where
        T: 'static,
        F: FnOnce() -> T + 'static,
    {
        let promise = Promise::new();
        let value_slot = promise.clone();
        let body = Box::new(move || {
            let value = func();
            value_slot.set_value(value);
        });
        let failure_slot = promise.clone();
        let on_done: DoneCallback = Box::new(move |capsule| {
            if capsule.has_failure() {
                failure_slot.set_failure(capsule);
            }
        });
        let co = Coroutine::new(body, Some(on_done));
        co.set_promise_anchor(Box::new(promise.clone()));
        self.enqueue(co);
        promise
    }

    /// Fire-and-forget spawn; result and failure are discarded.
    fn add_internal(&self, func: Box<dyn FnOnce()>) {
        let co = Coroutine::new(func, None);
        self.enqueue(co);
    }

    fn enqueue(&self, co: Rc<Coroutine>) {
        trace!("spawned coroutine {}", co.id().as_u64());
        self.ready.borrow_mut().push_back(co.clone());
        self.coroutines.borrow_mut().push(co);
    }

    /// Park the running coroutine on the timer wheel and switch away.
    fn sleep_current(&self, duration: Duration) {
        let Some(co) = self.running() else {
            return;
        };
        let wake_at = Instant::now() + duration;
        self.timers.borrow_mut().insert(wake_at, co.id());
        self.sleeping.borrow_mut().insert(co.id());
        crate::coroutine::yield_execution();
    }

    /// Switch into `co` from the main context and absorb the outcome.
    fn resume(&self, co: &Rc<Coroutine>) {
        *self.running.borrow_mut() = Some(co.clone());
        co.set_state(CoroutineState::Running);

        let _ = co.switch_in();

        *self.running.borrow_mut() = None;
        if co.capsule().has_failure() {
            trace!("coroutine {} faulted", co.id().as_u64());
            co.set_state(CoroutineState::Finished);
            *self.deferred_fault.borrow_mut() = Some(co.capsule().clone());
        }
    }

    fn find(&self, id: CoroutineId) -> Option<Rc<Coroutine>> {
        self.coroutines
            .borrow()
            .iter()
            .find(|co| co.id() == id)
            .cloned()
    }

    /// Drive the loop until no owned coroutines remain.
    fn run(&self) {
        trace!(
            "running scheduler with {} initial coroutines",
            self.coroutines.borrow().len()
        );
        loop {
            if self.coroutines.borrow().is_empty() {
                break;
            }

            // Move expired sleepers to the ready queue.
            let now = Instant::now();
            let expired = self.timers.borrow_mut().pop_expired(now);
            for id in expired {
                self.sleeping.borrow_mut().remove(&id);
                if let Some(co) = self.find(id) {
                    self.ready.borrow_mut().push_back(co);
                }
            }

            // Drain the ready queue fully.
            loop {
                let next = self.ready.borrow_mut().pop_front();
                match next {
                    Some(co) if co.state() != CoroutineState::Finished => self.resume(&co),
                    Some(_) => {}
                    None => break,
                }
            }

            // Re-queue suspended coroutines with no parking arrangement.
            // This is what gives a bare yield its go-to-back-of-line
            // semantics without the coroutine touching the queue itself.
            let revived: Vec<Rc<Coroutine>> = {
                let sleeping = self.sleeping.borrow();
                self.coroutines
                    .borrow()
                    .iter()
                    .filter(|co| {
                        co.state() == CoroutineState::Suspended
                            && !co.io_parked()
                            && !sleeping.contains(&co.id())
                    })
                    .cloned()
                    .collect()
            };
            self.ready.borrow_mut().extend(revived);

            // Retire finished coroutines, then run their callbacks with no
            // borrows held.
            let retired: Vec<Rc<Coroutine>> = {
                let mut owned = self.coroutines.borrow_mut();
                let (done, live): (Vec<_>, Vec<_>) = owned
                    .drain(..)
                    .partition(|co| co.state() == CoroutineState::Finished);
                *owned = live;
                done
            };
            for co in &retired {
                trace!("retiring coroutine {}", co.id().as_u64());
                co.run_on_done();
            }
            drop(retired);

            if self.coroutines.borrow().is_empty() {
                break;
            }
            if !self.ready.borrow().is_empty() {
                continue;
            }

            // Quiescent: wait on the reactor, capped by the next timer wake.
            trace!(
                "waiting on reactor ({} sleeping)",
                self.timers.borrow().len()
            );
            let timeout = self
                .timers
                .borrow()
                .next_wake()
                .map(|wake| wake.saturating_duration_since(Instant::now()));
            if let Some(id) = self.port.wait(timeout) {
                match self.find(id) {
                    Some(co) => {
                        trace!("completion resumes coroutine {}", id.as_u64());
                        co.set_io_parked(false);
                        self.ready.borrow_mut().push_back(co);
                    }
                    None => trace!("completion for retired coroutine {}", id.as_u64()),
                }
            }
        }
        trace!("scheduler drained");
    }
}

// ============================================================================
// Public scheduler surface
// ============================================================================

enum Flavor {
    Cooperative(Rc<CoopCore>),
    Pool(Arc<PoolShared>),
}

/// A scheduler: either a per-thread cooperative loop or a worker pool.
pub struct Scheduler {
    flavor: Flavor,
}

impl Scheduler {
    /// Create the cooperative loop for this thread.
    ///
    /// Fails with [`SchedulerError::SchedulerExists`] if the thread already
    /// has one.
    pub fn new_cooperative() -> Result<Self, SchedulerError> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(SchedulerError::SchedulerExists);
            }
            let core = Rc::new(CoopCore::new());
            *slot = Some(core.clone());
            trace!("cooperative scheduler created");
            Ok(Self {
                flavor: Flavor::Cooperative(core),
            })
        })
    }

    /// Create a worker pool with `workers` threads (0 = one per CPU core).
    pub fn new_pool(workers: usize) -> Self {
        Self {
            flavor: Flavor::Pool(PoolShared::start(workers)),
        }
    }

    fn coop(&self) -> Result<&Rc<CoopCore>, SchedulerError> {
        match &self.flavor {
            Flavor::Cooperative(core) => Ok(core),
            Flavor::Pool(_) => Err(SchedulerError::NotCooperative),
        }
    }

    /// Spawn a coroutine running `func`; returns its promise.
    pub fn spawn<T, F>(&self, func: F) -> Result<Arc<Promise<T>>, SchedulerError>
    where
        T: 'static,
        F: FnOnce() -> T + 'static,
    {
        Ok(self.coop()?.spawn_internal(func))
    }

    /// Spawn a unit coroutine whose result and failure are discarded.
    pub fn add<F>(&self, func: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + 'static,
    {
        self.coop()?.add_internal(Box::new(func));
        Ok(())
    }

    /// Bind an OS handle to the reactor. Idempotent per handle.
    pub fn register_handle(&self, handle: &impl AsRawFd) -> Result<(), SchedulerError> {
        self.coop()?.port.register(handle)
    }

    /// Drive the cooperative loop until every coroutine has retired.
    pub fn run(&self) -> Result<(), SchedulerError> {
        self.coop()?.run();
        Ok(())
    }

    /// Enqueue a thunk onto a worker pool.
    pub fn submit<F>(&self, func: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.flavor {
            Flavor::Pool(pool) => pool.submit(Box::new(func)),
            Flavor::Cooperative(_) => Err(SchedulerError::NotAPool),
        }
    }

    /// Shut down a worker pool: no-op on a cooperative scheduler, idempotent
    /// on a pool. Runs implicitly on drop.
    pub fn stop(&self) {
        if let Flavor::Pool(pool) = &self.flavor {
            pool.stop();
        }
    }

    /// Take the capsule of the most recently faulted coroutine, if any.
    pub fn poll_fault(&self) -> Option<Arc<Capsule>> {
        match &self.flavor {
            Flavor::Cooperative(core) => core.deferred_fault.borrow_mut().take(),
            Flavor::Pool(_) => None,
        }
    }

    /// Park the current coroutine on its scheduler's timer wheel for
    /// `duration`, then yield. No-op outside a coroutine.
    pub fn async_sleep(duration: Duration) {
        if let Some(core) = current_core() {
            core.sleep_current(duration);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        match &self.flavor {
            Flavor::Cooperative(core) => CURRENT.with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.as_ref().is_some_and(|current| Rc::ptr_eq(current, core)) {
                    *slot = None;
                }
            }),
            Flavor::Pool(pool) => pool.stop(),
        }
    }
}

// ============================================================================
// Reactor access for in-coroutine collaborators
// ============================================================================

/// Bind a handle to the current thread's scheduler reactor.
///
/// The free-function form exists for I/O collaborators running inside a
/// coroutine, where the owning [`Scheduler`] value is not reachable.
pub fn register_handle(handle: &impl AsRawFd) -> Result<(), SchedulerError> {
    let core = current_core().ok_or(SchedulerError::NoScheduler)?;
    core.port.register(handle)
}

/// Submit an asynchronous operation against a registered handle, tagged
/// with the running coroutine's identity.
///
/// The caller is expected to call
/// [`suspend_execution`](crate::coroutine::suspend_execution) afterwards;
/// the operation's completion re-queues the coroutine, and the final status
/// is read from the returned record once resumed.
pub fn submit_io<F>(handle: &impl AsRawFd, work: F) -> Result<IoOperation, SchedulerError>
where
    F: FnOnce() -> io::Result<usize> + Send + 'static,
{
    let core = current_core().ok_or(SchedulerError::NoScheduler)?;
    let co = core.running().ok_or(SchedulerError::NotInCoroutine)?;
    let work: IoWork = Box::new(work);
    core.port.submit(co.id(), handle.as_raw_fd(), work)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_one_scheduler_per_thread() {
        let _first = Scheduler::new_cooperative().unwrap();
        assert!(matches!(
            Scheduler::new_cooperative(),
            Err(SchedulerError::SchedulerExists)
        ));
    }

    #[test]
    fn test_thread_slot_cleared_on_drop() {
        {
            let _sched = Scheduler::new_cooperative().unwrap();
            assert!(current_core().is_some());
        }
        assert!(current_core().is_none());
        let _again = Scheduler::new_cooperative().unwrap();
    }

    #[test]
    fn test_run_executes_spawned_coroutines() {
        let sched = Scheduler::new_cooperative().unwrap();
        let promise = sched.spawn(|| 41 + 1).unwrap();
        assert!(!promise.is_settled());
        sched.run().unwrap();
        assert_eq!(promise.get().unwrap(), 42);
    }

    #[test]
    fn test_add_discards_result() {
        let sched = Scheduler::new_cooperative().unwrap();
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        sched.add(move || flag.set(true)).unwrap();
        sched.run().unwrap();
        assert!(ran.get());
    }

    #[test]
    fn test_submit_on_cooperative_scheduler_fails() {
        let sched = Scheduler::new_cooperative().unwrap();
        assert!(matches!(
            sched.submit(|| {}),
            Err(SchedulerError::NotAPool)
        ));
    }

    #[test]
    fn test_stop_on_cooperative_scheduler_is_noop() {
        let sched = Scheduler::new_cooperative().unwrap();
        sched.stop();
        sched.stop();
    }

    #[test]
    fn test_cooperative_calls_on_pool_fail() {
        let pool = Scheduler::new_pool(1);
        assert!(matches!(
            pool.spawn(|| 1),
            Err(SchedulerError::NotCooperative)
        ));
        assert!(matches!(pool.run(), Err(SchedulerError::NotCooperative)));
        assert!(matches!(
            pool.add(|| {}),
            Err(SchedulerError::NotCooperative)
        ));
        pool.stop();
    }

    #[test]
    fn test_poll_fault_returns_deferred_capsule() {
        let sched = Scheduler::new_cooperative().unwrap();
        assert!(sched.poll_fault().is_none());
        let promise: Arc<Promise<()>> =
            sched.spawn(|| crate::fault::raise("deferred")).unwrap();
        sched.run().unwrap();
        let capsule = sched.poll_fault().expect("fault was deferred");
        assert_eq!(capsule.message().as_deref(), Some("deferred"));
        // The slot is drained by the poll.
        assert!(sched.poll_fault().is_none());
        assert!(promise.has_failure());
    }

    #[test]
    fn test_async_sleep_outside_coroutine_is_noop() {
        Scheduler::async_sleep(Duration::from_millis(1));
    }

    #[test]
    fn test_submit_io_outside_coroutine_fails() {
        let _sched = Scheduler::new_cooperative().unwrap();
        let file = tempfile::tempfile().unwrap();
        register_handle(&file).unwrap();
        assert!(matches!(
            submit_io(&file, || Ok(0)),
            Err(SchedulerError::NotInCoroutine)
        ));
    }

    #[test]
    fn test_register_without_scheduler_fails() {
        let file = tempfile::tempfile().unwrap();
        assert!(matches!(
            register_handle(&file),
            Err(SchedulerError::NoScheduler)
        ));
    }
}
