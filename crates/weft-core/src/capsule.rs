//! Exception capsule: carries a captured fault across a stack unwind.
//!
//! A fault intercepted inside a coroutine cannot flow through normal
//! unwinding across a stack switch, so it is recorded here instead. The
//! capsule is heap-resident and shared between exactly two parties: the
//! coroutine that fills it and the promise that inspects and re-raises it.
//! It outlives the coroutine for as long as the promise holds a reference.

use crate::error::FaultInfo;
use parking_lot::Mutex;
use std::any::Any;
use std::panic;

/// Category of a captured fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Raised deliberately by user code.
    User,
    /// Illegal operation: divide by zero, out-of-bounds index, arithmetic
    /// overflow, unwrap of an empty value.
    IllegalOp,
    /// Reserved for a future cancellation primitive.
    Cancelled,
}

/// Context recorded by the fault intercept before the unwind starts.
struct Staged {
    kind: FaultKind,
    message: String,
    location: Option<String>,
}

/// The completed fault record, including the original panic payload.
struct Captured {
    kind: FaultKind,
    message: String,
    location: Option<String>,
    payload: Option<Box<dyn Any + Send>>,
}

/// Heap record carrying a fault from a coroutine to its awaiter.
pub struct Capsule {
    /// Written by the fault intercept at panic time, before unwinding.
    staged: Mutex<Option<Staged>>,
    /// Completed by the coroutine trampoline once the unwind is caught.
    captured: Mutex<Option<Captured>>,
}

impl Capsule {
    pub(crate) fn new() -> Self {
        Self {
            staged: Mutex::new(None),
            captured: Mutex::new(None),
        }
    }

    /// Record fault context from the intercept. The capsule does not report
    /// a failure until the unwind is captured by [`Capsule::capture_panic`].
    pub(crate) fn stage(&self, kind: FaultKind, message: String, location: Option<String>) {
        *self.staged.lock() = Some(Staged {
            kind,
            message,
            location,
        });
    }

    /// Complete the record with the panic payload caught at the trampoline.
    ///
    /// Prefers the staged context from the intercept (it carries the fault
    /// location); classifies from the payload when no context was staged.
    pub(crate) fn capture_panic(&self, payload: Box<dyn Any + Send>) {
        let (kind, message, location) = match self.staged.lock().take() {
            Some(staged) => (staged.kind, staged.message, staged.location),
            None => {
                let message = payload_message(payload.as_ref());
                let kind = classify_payload(payload.as_ref(), &message);
                (kind, message, None)
            }
        };
        *self.captured.lock() = Some(Captured {
            kind,
            message,
            location,
            payload: Some(payload),
        });
    }

    /// Whether a fault has been captured.
    pub fn has_failure(&self) -> bool {
        self.captured.lock().is_some()
    }

    /// Category of the captured fault, if any.
    pub fn kind(&self) -> Option<FaultKind> {
        self.captured.lock().as_ref().map(|c| c.kind)
    }

    /// Message of the captured fault, if any.
    pub fn message(&self) -> Option<String> {
        self.captured.lock().as_ref().map(|c| c.message.clone())
    }

    /// Detached summary of the captured fault, if any.
    pub fn fault_info(&self) -> Option<FaultInfo> {
        self.captured
            .lock()
            .as_ref()
            .map(|c| FaultInfo::new(c.kind, c.message.clone(), c.location.clone()))
    }

    /// Re-raise the captured fault in the caller's context. Returns normally
    /// when the capsule holds no failure. The original payload is re-raised
    /// once; later calls re-raise the recorded message.
    pub fn rethrow(&self) {
        let (payload, message) = {
            let mut captured = self.captured.lock();
            match captured.as_mut() {
                Some(c) => (c.payload.take(), c.message.clone()),
                None => return,
            }
        };
        match payload {
            Some(payload) => panic::resume_unwind(payload),
            None => panic::resume_unwind(Box::new(message)),
        }
    }
}

/// Extract a human-readable message from a panic payload.
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(raised) = payload.downcast_ref::<crate::fault::RaisedFault>() {
        raised.message().to_string()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown fault".to_string()
    }
}

/// Standard library panic texts that indicate an illegal operation rather
/// than a deliberately raised failure.
const ILLEGAL_OP_MESSAGES: &[&str] = &[
    "attempt to divide by zero",
    "attempt to calculate the remainder with a divisor of zero",
    "attempt to add with overflow",
    "attempt to subtract with overflow",
    "attempt to multiply with overflow",
    "attempt to negate with overflow",
    "index out of bounds",
    "slice index",
    "range start index",
    "range end index",
    "called `Option::unwrap()` on a `None` value",
    "called `Result::unwrap()` on an `Err` value",
];

/// Classify a fault from its message alone.
pub(crate) fn classify_message(message: &str) -> FaultKind {
    if ILLEGAL_OP_MESSAGES.iter().any(|p| message.starts_with(p)) {
        FaultKind::IllegalOp
    } else {
        FaultKind::User
    }
}

fn classify_payload(payload: &(dyn Any + Send), message: &str) -> FaultKind {
    if payload.is::<crate::fault::RaisedFault>() {
        FaultKind::User
    } else {
        classify_message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_capsule() {
        let capsule = Capsule::new();
        assert!(!capsule.has_failure());
        assert!(capsule.kind().is_none());
        assert!(capsule.message().is_none());
        // Rethrowing an empty capsule is a no-op.
        capsule.rethrow();
    }

    #[test]
    fn test_capture_classifies_user_fault() {
        let capsule = Capsule::new();
        capsule.capture_panic(Box::new("something went wrong"));
        assert!(capsule.has_failure());
        assert_eq!(capsule.kind(), Some(FaultKind::User));
        assert_eq!(capsule.message().as_deref(), Some("something went wrong"));
    }

    #[test]
    fn test_capture_classifies_illegal_op() {
        let capsule = Capsule::new();
        capsule.capture_panic(Box::new("attempt to divide by zero".to_string()));
        assert_eq!(capsule.kind(), Some(FaultKind::IllegalOp));
    }

    #[test]
    fn test_staged_context_wins() {
        let capsule = Capsule::new();
        capsule.stage(
            FaultKind::User,
            "boom".to_string(),
            Some("lib.rs:1:1".to_string()),
        );
        capsule.capture_panic(Box::new("attempt to divide by zero"));
        assert_eq!(capsule.kind(), Some(FaultKind::User));
        assert_eq!(capsule.message().as_deref(), Some("boom"));
        let info = capsule.fault_info().unwrap();
        assert_eq!(info.location(), Some("lib.rs:1:1"));
    }

    #[test]
    fn test_stage_alone_is_not_a_failure() {
        let capsule = Capsule::new();
        capsule.stage(FaultKind::User, "half-recorded".to_string(), None);
        assert!(!capsule.has_failure());
    }

    #[test]
    fn test_rethrow_resumes_payload() {
        let capsule = Capsule::new();
        capsule.capture_panic(Box::new("boom"));
        let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| capsule.rethrow()))
            .unwrap_err();
        assert_eq!(payload_message(err.as_ref()), "boom");
    }

    #[test]
    fn test_classify_message_table() {
        assert_eq!(
            classify_message("index out of bounds: the len is 3 but the index is 7"),
            FaultKind::IllegalOp
        );
        assert_eq!(classify_message("Test exception"), FaultKind::User);
    }
}
