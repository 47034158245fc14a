//! Asynchronous positional file reads over the weft completion reactor.
//!
//! This crate is a collaborator of `weft-core`, not part of it: it consumes
//! only the public reactor contract. A read running inside a coroutine
//! (1) binds the file to the reactor, (2) issues the positional read as an
//! operation tagged with the running coroutine's identity, (3) suspends for
//! I/O, and (4) inspects the operation's final status once the completion
//! has resumed it. A synchronous failure is observed exactly the same way.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use parking_lot::Mutex;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;
use weft_core::{register_handle, submit_io, suspend_execution, SchedulerError};

/// Read up to `len` bytes from `file` at byte `offset` without blocking the
/// cooperative loop.
///
/// Must be called from inside a running coroutine; other coroutines on the
/// same scheduler keep running while the read is in flight. Returns the
/// bytes actually read, truncated to the transferred count (short at end of
/// file, like any positional read).
pub fn read_at(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    register_handle(file).map_err(into_io)?;

    let reader = file.try_clone()?;
    let buffer = Arc::new(Mutex::new(vec![0u8; len]));
    let shared = buffer.clone();
    let op = submit_io(file, move || {
        let mut buf = shared.lock();
        reader.read_at(&mut buf, offset)
    })
    .map_err(into_io)?;

    suspend_execution();

    let transferred = op
        .take_result()
        .ok_or_else(|| io::Error::other("operation resumed before completion"))??;

    let mut data = match Arc::try_unwrap(buffer) {
        Ok(buf) => buf.into_inner(),
        Err(shared) => shared.lock().clone(),
    };
    data.truncate(transferred);
    Ok(data)
}

fn into_io(err: SchedulerError) -> io::Error {
    match err {
        SchedulerError::Register(inner) => inner,
        other => io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use weft_core::Scheduler;

    #[test]
    fn test_read_outside_coroutine_fails() {
        let _sched = Scheduler::new_cooperative().unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        let reopened = File::open(file.path()).unwrap();
        assert!(read_at(&reopened, 0, 16).is_err());
    }
}
