//! Documents the one situation the runtime cannot recover from: an OS-level
//! mutex shared between coroutines on the same scheduler.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use weft_core::Scheduler;

/// Coroutine A takes an OS mutex and sleeps while holding it. Coroutine B
/// then blocks the entire scheduler thread trying to acquire the same
/// mutex, so A can never be resumed to release it. The blocking acquire is
/// not a suspension point, which is why no recovery is possible from inside
/// the loop.
#[test]
#[ignore = "blocks forever by design: an OS mutex acquire is not a suspension point"]
fn test_os_mutex_across_coroutines_deadlocks_the_scheduler() {
    let sched = Scheduler::new_cooperative().unwrap();
    let lock = Arc::new(Mutex::new(()));

    let first = lock.clone();
    sched
        .add(move || {
            let _guard = first.lock().unwrap();
            Scheduler::async_sleep(Duration::from_millis(100));
        })
        .unwrap();

    let second = lock.clone();
    sched
        .add(move || {
            let _guard = second.lock().unwrap();
        })
        .unwrap();

    // Never returns.
    sched.run().unwrap();
}
