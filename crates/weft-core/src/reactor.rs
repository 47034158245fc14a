//! Completion reactor: binds handles to a completion facility and wakes
//! coroutines when their I/O finishes.
//!
//! Operations are submitted as per-operation records that embed the
//! submitting coroutine's identity, serviced by a dedicated I/O thread, and
//! reported back on a completion channel. The scheduler's wait point blocks
//! on that channel, capped by the next timer wake. A synchronous failure
//! travels the same completion path as a pending-then-failed operation: the
//! submitting helper inspects the record's final status after it resumes.

use crate::coroutine::CoroutineId;
use crate::error::SchedulerError;
use crate::trace::trace;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Work executed by the I/O thread for one operation.
pub(crate) type IoWork = Box<dyn FnOnce() -> io::Result<usize> + Send + 'static>;

struct OpShared {
    coroutine: CoroutineId,
    descriptor: RawFd,
    result: Mutex<Option<io::Result<usize>>>,
}

/// Per-operation record handed back to the submitting I/O helper.
///
/// The final status becomes available once the owning coroutine is resumed
/// by the completion that this record produced.
pub struct IoOperation {
    shared: Arc<OpShared>,
}

impl IoOperation {
    /// The handle this operation was issued against.
    pub fn descriptor(&self) -> RawFd {
        self.shared.descriptor
    }

    /// Take the operation's final status. `None` while still in flight.
    pub fn take_result(&self) -> Option<io::Result<usize>> {
        self.shared.result.lock().take()
    }
}

struct Submission {
    op: Arc<OpShared>,
    work: IoWork,
}

struct Completion {
    op: Arc<OpShared>,
}

/// The completion facility: a handle registry, a submission queue serviced
/// by one I/O thread, and the completion channel the scheduler waits on.
pub(crate) struct CompletionPort {
    registered: RefCell<FxHashSet<RawFd>>,
    submit_tx: Option<Sender<Submission>>,
    completion_rx: Receiver<Completion>,
    io_thread: Option<JoinHandle<()>>,
}

impl CompletionPort {
    pub(crate) fn new() -> Self {
        let (submit_tx, submit_rx) = unbounded::<Submission>();
        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let io_thread = thread::Builder::new()
            .name("weft-io".to_string())
            .spawn(move || io_loop(submit_rx, completion_tx))
            .expect("failed to spawn reactor I/O thread");
        Self {
            registered: RefCell::new(FxHashSet::default()),
            submit_tx: Some(submit_tx),
            completion_rx,
            io_thread: Some(io_thread),
        }
    }

    /// Bind a handle to the completion facility. Idempotent per handle.
    pub(crate) fn register(&self, handle: &impl AsRawFd) -> Result<(), SchedulerError> {
        let fd = handle.as_raw_fd();
        if fd < 0 {
            return Err(SchedulerError::Register(io::Error::from(
                io::ErrorKind::InvalidInput,
            )));
        }
        self.registered.borrow_mut().insert(fd);
        Ok(())
    }

    pub(crate) fn is_registered(&self, descriptor: RawFd) -> bool {
        self.registered.borrow().contains(&descriptor)
    }

    /// Queue `work` against a registered handle, tagged with the submitting
    /// coroutine. The coroutine is re-queued when the completion arrives.
    pub(crate) fn submit(
        &self,
        coroutine: CoroutineId,
        descriptor: RawFd,
        work: IoWork,
    ) -> Result<IoOperation, SchedulerError> {
        if !self.is_registered(descriptor) {
            return Err(SchedulerError::UnregisteredHandle(descriptor));
        }
        let shared = Arc::new(OpShared {
            coroutine,
            descriptor,
            result: Mutex::new(None),
        });
        let submit_tx = self
            .submit_tx
            .as_ref()
            .expect("submission channel open while the port is alive");
        submit_tx
            .send(Submission {
                op: shared.clone(),
                work,
            })
            .expect("reactor I/O thread alive while the port is alive");
        trace!(
            "submitted operation on fd {} for coroutine {}",
            descriptor,
            coroutine.as_u64()
        );
        Ok(IoOperation { shared })
    }

    /// Block up to `timeout` for one completion; `None` waits indefinitely.
    /// Resolves the completed record back to its coroutine.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Option<CoroutineId> {
        let completion = match timeout {
            Some(timeout) => self.completion_rx.recv_timeout(timeout).ok()?,
            None => self.completion_rx.recv().ok()?,
        };
        Some(completion.op.coroutine)
    }
}

impl Drop for CompletionPort {
    fn drop(&mut self) {
        // Disconnecting the submission channel stops the I/O thread.
        self.submit_tx.take();
        if let Some(handle) = self.io_thread.take() {
            let _ = handle.join();
        }
    }
}

fn io_loop(submit_rx: Receiver<Submission>, completion_tx: Sender<Completion>) {
    for Submission { op, work } in submit_rx.iter() {
        let result = work();
        trace!(
            "operation on fd {} completed ({})",
            op.descriptor,
            if result.is_ok() { "ok" } else { "error" }
        );
        *op.result.lock() = Some(result);
        if completion_tx.send(Completion { op }).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let port = CompletionPort::new();
        let file = tempfile::tempfile().unwrap();
        port.register(&file).unwrap();
        port.register(&file).unwrap();
        assert!(port.is_registered(file.as_raw_fd()));
    }

    #[test]
    fn test_register_rejects_invalid_fd() {
        struct Bogus;
        impl AsRawFd for Bogus {
            fn as_raw_fd(&self) -> RawFd {
                -1
            }
        }
        let port = CompletionPort::new();
        assert!(matches!(
            port.register(&Bogus),
            Err(SchedulerError::Register(_))
        ));
    }

    #[test]
    fn test_submit_requires_registration() {
        let port = CompletionPort::new();
        let file = tempfile::tempfile().unwrap();
        let result = port.submit(CoroutineId::next(), file.as_raw_fd(), Box::new(|| Ok(0)));
        assert!(matches!(
            result,
            Err(SchedulerError::UnregisteredHandle(_))
        ));
    }

    #[test]
    fn test_completion_round_trip() {
        let port = CompletionPort::new();
        let file = tempfile::tempfile().unwrap();
        port.register(&file).unwrap();

        let coroutine = CoroutineId::next();
        let op = port
            .submit(coroutine, file.as_raw_fd(), Box::new(|| Ok(13)))
            .unwrap();

        let woken = port.wait(Some(Duration::from_secs(2)));
        assert_eq!(woken, Some(coroutine));
        assert_eq!(op.take_result().unwrap().unwrap(), 13);
        // The result is consumed on first take.
        assert!(op.take_result().is_none());
    }

    #[test]
    fn test_wait_times_out_with_no_completions() {
        let port = CompletionPort::new();
        assert!(port.wait(Some(Duration::from_millis(20))).is_none());
    }
}
