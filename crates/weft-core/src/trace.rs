//! Verbose tracing gated on the `WEFT_TRACE` environment variable.
//!
//! Tracing has no semantic effect; it exists so scheduler decisions can be
//! followed from a terminal while debugging coroutine interleavings.

use std::sync::OnceLock;

/// Whether `WEFT_TRACE` was set when tracing was first consulted.
pub(crate) fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os("WEFT_TRACE").is_some())
}

macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::trace::enabled() {
            eprintln!("[weft] {}", format_args!($($arg)*));
        }
    };
}

pub(crate) use trace;
