//! Worker pool: OS threads each hosting a private cooperative scheduler.
//!
//! The pool shares nothing with any cooperative scheduler; it owns one
//! mutex-guarded FIFO of thunks and a condition variable, the only contended
//! structure in the system. Each worker pops a thunk, wraps it as
//! a coroutine on its private scheduler, and runs that scheduler to
//! quiescence, so offloaded work can itself spawn cooperative coroutines.

use crate::capsule::Capsule;
use crate::error::SchedulerError;
use crate::promise::Promise;
use crate::scheduler::Scheduler;
use crate::trace::trace;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolQueue {
    jobs: VecDeque<Job>,
    stop: bool,
}

/// State shared between the pool handle and its workers.
pub(crate) struct PoolShared {
    queue: Mutex<PoolQueue>,
    available: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolShared {
    /// Start `worker_count` workers (0 = one per CPU core).
    pub(crate) fn start(worker_count: usize) -> Arc<Self> {
        let count = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };
        let shared = Arc::new(Self {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                stop: false,
            }),
            available: Condvar::new(),
            workers: Mutex::new(Vec::new()),
        });
        let mut workers = shared.workers.lock();
        for id in 0..count {
            let pool = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("weft-worker-{id}"))
                .spawn(move || worker_loop(&pool))
                .expect("failed to spawn pool worker thread");
            workers.push(handle);
        }
        drop(workers);
        trace!("worker pool started with {count} workers");
        shared
    }

    /// Append a thunk and signal one waiting worker.
    pub(crate) fn submit(&self, job: Job) -> Result<(), SchedulerError> {
        {
            let mut queue = self.queue.lock();
            if queue.stop {
                return Err(SchedulerError::PoolStopped);
            }
            queue.jobs.push_back(job);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Set the stop flag, wake every worker, and join them. Idempotent: a
    /// second call finds no workers left to join.
    pub(crate) fn stop(&self) {
        {
            let mut queue = self.queue.lock();
            queue.stop = true;
        }
        self.available.notify_all();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(pool: &PoolShared) {
    let scheduler =
        Scheduler::new_cooperative().expect("pool worker thread has no scheduler yet");
    loop {
        let job = {
            let mut queue = pool.queue.lock();
            while queue.jobs.is_empty() && !queue.stop {
                pool.available.wait(&mut queue);
            }
            if queue.stop && queue.jobs.is_empty() {
                return;
            }
            queue.jobs.pop_front().expect("queue checked non-empty")
        };
        scheduler
            .add(job)
            .expect("worker scheduler is cooperative");
        scheduler
            .run()
            .expect("worker scheduler is cooperative");
    }
}

fn default_pool() -> &'static Arc<PoolShared> {
    static DEFAULT_POOL: OnceLock<Arc<PoolShared>> = OnceLock::new();
    DEFAULT_POOL.get_or_init(|| PoolShared::start(num_cpus::get()))
}

/// Offload `func` to the process-wide worker pool.
///
/// Allocates a fresh promise, packages `func` to settle it from the pool
/// side, and submits. The promise is observed like any other: awaiters poll
/// it, yielding between polls when inside a coroutine. A fault in `func`
/// settles the promise as failed.
pub fn run_on_pool<T, F>(func: F) -> Arc<Promise<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let promise = Promise::new();
    let slot = promise.clone();
    let job: Job = Box::new(move || {
        match panic::catch_unwind(AssertUnwindSafe(func)) {
            Ok(value) => slot.set_value(value),
            Err(payload) => {
                let capsule = Capsule::new();
                capsule.capture_panic(payload);
                slot.set_failure(Arc::new(capsule));
            }
        }
    });
    default_pool()
        .submit(job)
        .expect("process-wide pool is never stopped");
    promise
}
