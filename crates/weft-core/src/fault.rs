//! Process-wide fault intercept.
//!
//! A fault inside a coroutine is a panic. The intercept is a chained panic
//! hook: while a coroutine is running on the panicking thread, the hook
//! records the fault's category, message, and location into that coroutine's
//! capsule and suppresses the default report; the unwind then proceeds on
//! the coroutine's own stack and is caught at the trampoline. Panics with no
//! running coroutine are handed to the previously installed hook unchanged.
//!
//! The hook is installed when the first scheduler in the process is
//! constructed and restored when the last one is dropped.

use crate::capsule::{classify_message, payload_message, FaultKind};
use crate::scheduler;
use parking_lot::Mutex;
use std::panic::{self, PanicHookInfo};

/// Payload for failures raised deliberately inside a coroutine.
#[derive(Debug)]
pub struct RaisedFault {
    message: String,
}

impl RaisedFault {
    /// The message this failure was raised with.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raise a typed user failure from inside a coroutine.
///
/// The failure is captured into the coroutine's capsule and surfaces at the
/// awaiter when the coroutine's promise is read.
#[track_caller]
pub fn raise(message: impl Into<String>) -> ! {
    panic::panic_any(RaisedFault {
        message: message.into(),
    })
}

type Hook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

struct InterceptState {
    installs: usize,
    previous: Option<Hook>,
}

static INTERCEPT: Mutex<InterceptState> = Mutex::new(InterceptState {
    installs: 0,
    previous: None,
});

/// Keeps the intercept installed; dropping the last guard restores the
/// previous hook.
pub(crate) struct InterceptGuard(());

pub(crate) fn install() -> InterceptGuard {
    let mut state = INTERCEPT.lock();
    if state.installs == 0 {
        state.previous = Some(panic::take_hook());
        panic::set_hook(Box::new(intercept_hook));
    }
    state.installs += 1;
    InterceptGuard(())
}

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        let mut state = INTERCEPT.lock();
        state.installs -= 1;
        if state.installs == 0 {
            drop(panic::take_hook());
            if let Some(previous) = state.previous.take() {
                panic::set_hook(previous);
            }
        }
    }
}

fn intercept_hook(info: &PanicHookInfo<'_>) {
    if let Some(capsule) = scheduler::running_capsule() {
        let message = payload_message(info.payload());
        let kind = if info.payload().is::<RaisedFault>() {
            FaultKind::User
        } else {
            classify_message(&message)
        };
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
        capsule.stage(kind, message, location);
        // Suppress the default report; the trampoline captures the unwind.
        return;
    }
    let state = INTERCEPT.lock();
    if let Some(previous) = &state.previous {
        previous(info);
    }
}
