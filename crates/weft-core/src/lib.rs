//! Weft: a single-threaded cooperative fiber scheduler with an attached
//! I/O completion reactor and an auxiliary worker-thread pool.
//!
//! The core abstraction is a stackful coroutine: an independently switchable
//! execution context that voluntarily yields control back to a central
//! scheduling loop. One scheduler multiplexes many coroutines over one OS
//! thread, suspends them for asynchronous I/O or timed sleeps, resumes them
//! when the completion arrives, and routes both results and faults back to
//! awaiters through one-shot promises. CPU-bound work is offloaded to a
//! fixed pool of worker threads, each hosting a private scheduler of its own.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use weft_core::Scheduler;
//!
//! let sched = Scheduler::new_cooperative().unwrap();
//!
//! let greeting = sched.spawn(|| {
//!     Scheduler::async_sleep(Duration::from_millis(10));
//!     "hello from coroutine".to_string()
//! }).unwrap();
//!
//! sched.add(|| {
//!     for _ in 0..3 {
//!         weft_core::yield_execution();
//!     }
//! }).unwrap();
//!
//! sched.run().unwrap();
//! assert_eq!(greeting.get().unwrap(), "hello from coroutine");
//! ```
//!
//! # Fault handling
//!
//! A panic inside a coroutine does not tear down the process: a process-wide
//! intercept records it into the coroutine's [`Capsule`], the coroutine is
//! retired, and the fault re-surfaces at whoever awaits its [`Promise`].
//!
//! Set the `WEFT_TRACE` environment variable to follow scheduler decisions
//! on stderr; it has no semantic effect.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod capsule;
mod context;
pub mod coroutine;
pub mod error;
pub mod fault;
mod pool;
pub mod promise;
pub mod reactor;
pub mod scheduler;
pub mod task;
mod timer;
mod trace;

pub use capsule::{Capsule, FaultKind};
pub use coroutine::{suspend_execution, yield_execution, CoroutineId};
pub use error::{AwaitError, FaultInfo, SchedulerError};
pub use fault::raise;
pub use pool::run_on_pool;
pub use promise::Promise;
pub use reactor::IoOperation;
pub use scheduler::{register_handle, submit_io, Scheduler};
pub use task::{create_task, TaskHandle};
