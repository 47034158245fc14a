//! End-to-end overlapped-style file read concurrent with timer sleeps.

use std::fs::File;
use std::io::Write;
use std::time::Duration;
use weft_core::Scheduler;

#[test]
fn test_async_read_with_concurrent_sleeper() {
    const CONTENT: &[u8] = b"Hello, Asynchronous World!";

    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(CONTENT).unwrap();
    source.flush().unwrap();
    let path = source.path().to_path_buf();

    let sched = Scheduler::new_cooperative().unwrap();

    let read = sched
        .spawn(move || {
            let file = File::open(&path).unwrap();
            weft_fs::read_at(&file, 0, 127).unwrap()
        })
        .unwrap();

    let ticks = sched
        .spawn(|| {
            let mut completed = 0u32;
            for _ in 0..5 {
                Scheduler::async_sleep(Duration::from_millis(50));
                completed += 1;
            }
            completed
        })
        .unwrap();

    sched.run().unwrap();

    let data = read.get().unwrap();
    assert_eq!(data.len(), CONTENT.len());
    assert_eq!(data, CONTENT);
    assert_eq!(ticks.get().unwrap(), 5);
}

#[test]
fn test_read_at_offset_is_honored() {
    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(b"skip-this-part|payload").unwrap();
    source.flush().unwrap();
    let path = source.path().to_path_buf();

    let sched = Scheduler::new_cooperative().unwrap();
    let read = sched
        .spawn(move || {
            let file = File::open(&path).unwrap();
            weft_fs::read_at(&file, 15, 64).unwrap()
        })
        .unwrap();

    sched.run().unwrap();
    assert_eq!(read.get().unwrap(), b"payload");
}

#[test]
fn test_read_past_end_of_file_is_empty() {
    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(b"tiny").unwrap();
    source.flush().unwrap();
    let path = source.path().to_path_buf();

    let sched = Scheduler::new_cooperative().unwrap();
    let read = sched
        .spawn(move || {
            let file = File::open(&path).unwrap();
            weft_fs::read_at(&file, 100, 16).unwrap()
        })
        .unwrap();

    sched.run().unwrap();
    assert!(read.get().unwrap().is_empty());
}

#[test]
fn test_synchronous_error_surfaces_after_resume() {
    let source = tempfile::NamedTempFile::new().unwrap();
    let path = source.path().to_path_buf();

    let sched = Scheduler::new_cooperative().unwrap();
    // A write-only descriptor fails the positional read; the failure rides
    // the same completion path as a successful operation.
    let failed = sched
        .spawn(move || {
            let file = File::options().write(true).open(&path).unwrap();
            weft_fs::read_at(&file, 0, 16).is_err()
        })
        .unwrap();

    sched.run().unwrap();
    assert!(failed.get().unwrap());
}
